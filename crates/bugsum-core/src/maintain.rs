//! Write-path hook keeping the journal in step with bug task mutations.
//!
//! The domain write path calls a [`SummaryObserver`] with the before/after
//! images of every row a statement touched, inside the same transaction as
//! the statement itself. [`SummaryMaintainer`] expands those images and
//! journals the resulting deltas.

use rusqlite::Connection;

use crate::db::journal::{JournalAppend, JournalWriter};
use crate::error::ErrorCode;
use crate::expand::{ExpandError, TagChange, TaskChange, expand_tag_changes, expand_task_changes};

#[derive(Debug, thiserror::Error)]
pub enum MaintainError {
    #[error("{}: {0}", ErrorCode::MalformedLocation.code())]
    Expand(#[from] ExpandError),

    #[error("{}: {0}", ErrorCode::DatabaseWriteFailed.code())]
    Sqlite(#[from] rusqlite::Error),
}

impl MaintainError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Expand(err) => err.code(),
            Self::Sqlite(_) => ErrorCode::DatabaseWriteFailed,
        }
    }
}

/// Receives bug task and tag mutations from the domain write path.
///
/// `conn` is the caller's open transaction. An error means the caller must
/// roll that transaction back.
pub trait SummaryObserver {
    /// Rows of the bug task relation were inserted, updated or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if an image is malformed or the journal write fails.
    fn on_task_changes(
        &self,
        conn: &Connection,
        changes: &[TaskChange],
    ) -> Result<JournalAppend, MaintainError>;

    /// Tags were added to or removed from bugs.
    ///
    /// # Errors
    ///
    /// Returns an error if an image is malformed or the journal write fails.
    fn on_tag_changes(
        &self,
        conn: &Connection,
        changes: &[TagChange],
    ) -> Result<JournalAppend, MaintainError>;
}

/// Expands mutations into locations and journals them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryMaintainer {
    writer: JournalWriter,
}

impl SummaryMaintainer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            writer: JournalWriter,
        }
    }
}

impl SummaryObserver for SummaryMaintainer {
    fn on_task_changes(
        &self,
        conn: &Connection,
        changes: &[TaskChange],
    ) -> Result<JournalAppend, MaintainError> {
        let deltas = expand_task_changes(changes)?;
        Ok(self.writer.append(conn, deltas)?)
    }

    fn on_tag_changes(
        &self,
        conn: &Connection,
        changes: &[TagChange],
    ) -> Result<JournalAppend, MaintainError> {
        let deltas = expand_tag_changes(changes)?;
        Ok(self.writer.append(conn, deltas)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::journal::{journal_len, pending_entries};
    use crate::db::open_in_memory;
    use crate::model::{BugTaskFlat, BugTaskImportance, BugTaskStatus, TargetColumns};

    fn task(product: Option<i64>, distribution: Option<i64>) -> BugTaskFlat {
        BugTaskFlat {
            bugtask: 1,
            bug: 1,
            duplicate_of: None,
            target: TargetColumns {
                product,
                distribution,
                ..TargetColumns::default()
            },
            status: BugTaskStatus::New,
            importance: BugTaskImportance::Undecided,
            milestone: None,
            assignee: None,
            latest_patch_uploaded: None,
            access_policies: None,
            access_grants: None,
            tags: vec!["a".into()],
        }
    }

    #[test]
    fn insert_journals_every_location() {
        let conn = open_in_memory().unwrap();
        let written = SummaryMaintainer::new()
            .on_task_changes(&conn, &[TaskChange::insert(task(Some(1), None))])
            .unwrap();
        assert_eq!(written.entries_written, 2);
        assert!(pending_entries(&conn, None).unwrap().iter().all(|e| e.delta == 1));
    }

    #[test]
    fn insert_and_delete_in_one_batch_cancel() {
        let conn = open_in_memory().unwrap();
        let written = SummaryMaintainer::new()
            .on_task_changes(
                &conn,
                &[
                    TaskChange::insert(task(Some(1), None)),
                    TaskChange::delete(task(Some(1), None)),
                ],
            )
            .unwrap();
        assert_eq!(written.entries_written, 0);
        assert_eq!(written.keys_cancelled, 2);
    }

    #[test]
    fn irrelevant_update_writes_nothing() {
        let conn = open_in_memory().unwrap();
        let before = task(Some(1), None);
        let mut after = before.clone();
        after.assignee = Some(77);

        let written = SummaryMaintainer::new()
            .on_task_changes(&conn, &[TaskChange::update(before, after)])
            .unwrap();
        assert_eq!(written, JournalAppend::default());
        assert_eq!(journal_len(&conn).unwrap(), 0);
    }

    #[test]
    fn malformed_image_fails_and_host_rolls_back() {
        let mut conn = open_in_memory().unwrap();
        let maintainer = SummaryMaintainer::new();
        {
            let tx = conn.transaction().unwrap();
            maintainer
                .on_task_changes(&tx, &[TaskChange::insert(task(Some(2), None))])
                .unwrap();
            let err = maintainer
                .on_task_changes(&tx, &[TaskChange::insert(task(Some(1), Some(1)))])
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::MalformedLocation);
            assert!(err.to_string().starts_with("E2001"));
            tx.rollback().unwrap();
        }
        assert_eq!(journal_len(&conn).unwrap(), 0);
    }

    #[test]
    fn tag_changes_route_through_the_same_writer() {
        let conn = open_in_memory().unwrap();
        let written = SummaryMaintainer::new()
            .on_tag_changes(
                &conn,
                &[TagChange {
                    tasks: vec![task(Some(1), None)],
                    removed: vec!["a".into()],
                    added: vec!["b".into()],
                }],
            )
            .unwrap();
        assert_eq!(written.entries_written, 2);
        let deltas: Vec<i64> = pending_entries(&conn, None)
            .unwrap()
            .into_iter()
            .map(|e| e.delta)
            .collect();
        assert_eq!(deltas, vec![-1, 1]);
    }
}
