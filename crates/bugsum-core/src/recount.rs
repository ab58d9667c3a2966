//! Brute-force recount of the summary from a snapshot of bug tasks.
//!
//! [`verify`] compares the current count (aggregate plus pending journal)
//! against the recount; [`repair`] journals the difference so the next
//! rollup converges on the recount.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::journal::{JournalAppend, JournalWriter};
use crate::db::view::{SummaryFilter, combined_rows};
use crate::error::ErrorCode;
use crate::expand::{ExpandError, locations};
use crate::model::{BugTaskFlat, LocationKey};

#[derive(Debug, thiserror::Error)]
pub enum RecountError {
    #[error("{}: {0}", ErrorCode::MalformedLocation.code())]
    Expand(#[from] ExpandError),

    #[error("{}: {0}", ErrorCode::DatabaseWriteFailed.code())]
    Sqlite(#[from] rusqlite::Error),
}

impl RecountError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Expand(err) => err.code(),
            Self::Sqlite(_) => ErrorCode::DatabaseWriteFailed,
        }
    }
}

/// True count per key over every task in `tasks`.
///
/// # Errors
///
/// Returns an error if any task image is malformed.
pub fn expected_counts(tasks: &[BugTaskFlat]) -> Result<BTreeMap<LocationKey, i64>, ExpandError> {
    let mut counts = BTreeMap::new();
    for task in tasks {
        for key in locations(task)? {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Current count per key from the combined view, omitting keys that sum
/// to zero.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn current_counts(conn: &Connection) -> rusqlite::Result<BTreeMap<LocationKey, i64>> {
    let mut counts = BTreeMap::new();
    for row in combined_rows(conn, &SummaryFilter::default())? {
        *counts.entry(row.key().clone()).or_insert(0) += row.contribution();
    }
    counts.retain(|_, count| *count != 0);
    Ok(counts)
}

/// Deltas that turn `current` into `expected`, in key order.
#[must_use]
pub fn diff_counts(
    expected: &BTreeMap<LocationKey, i64>,
    current: &BTreeMap<LocationKey, i64>,
) -> Vec<(LocationKey, i64)> {
    let mut keys: Vec<&LocationKey> = expected.keys().chain(current.keys()).collect();
    keys.sort_unstable();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let want = expected.get(key).copied().unwrap_or(0);
            let have = current.get(key).copied().unwrap_or(0);
            (want != have).then(|| (key.clone(), want - have))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub keys_checked: usize,
    /// Keys whose current count is not the recounted one, with the
    /// correcting delta.
    pub mismatches: Vec<(LocationKey, i64)>,
    /// Keys whose current count is below zero.
    pub negative_keys: usize,
    /// Set by [`repair`].
    pub journal: Option<JournalAppend>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.negative_keys == 0
    }
}

fn compare(conn: &Connection, tasks: &[BugTaskFlat]) -> Result<VerifyReport, RecountError> {
    let expected = expected_counts(tasks)?;
    let current = current_counts(conn)?;
    let negative_keys = current.values().filter(|count| **count < 0).count();
    let mut checked: Vec<&LocationKey> = expected.keys().chain(current.keys()).collect();
    checked.sort_unstable();
    checked.dedup();

    Ok(VerifyReport {
        keys_checked: checked.len(),
        mismatches: diff_counts(&expected, &current),
        negative_keys,
        journal: None,
    })
}

/// Compare the stored summary against a recount of `tasks`.
///
/// # Errors
///
/// Returns an error if a task is malformed or the query fails.
pub fn verify(conn: &Connection, tasks: &[BugTaskFlat]) -> Result<VerifyReport, RecountError> {
    let report = compare(conn, tasks)?;
    if report.is_consistent() {
        tracing::info!(keys = report.keys_checked, "bug summary consistent");
    } else {
        tracing::warn!(
            keys = report.keys_checked,
            mismatches = report.mismatches.len(),
            negative_keys = report.negative_keys,
            "bug summary out of step with bug tasks"
        );
    }
    Ok(report)
}

/// Journal the deltas that make the summary match a recount of `tasks`.
///
/// Runs in one transaction; the aggregate itself is corrected by the next
/// rollup.
///
/// # Errors
///
/// Returns an error if a task is malformed or a write fails, in which case
/// nothing is journaled.
pub fn repair(conn: &mut Connection, tasks: &[BugTaskFlat]) -> Result<VerifyReport, RecountError> {
    let tx = conn.transaction()?;
    let mut report = compare(&tx, tasks)?;
    let written = JournalWriter.append(&tx, report.mismatches.iter().cloned())?;
    tx.commit()?;

    tracing::info!(
        mismatches = report.mismatches.len(),
        entries_written = written.entries_written,
        "journaled bug summary corrections"
    );
    report.journal = Some(written);
    Ok(report)
}
