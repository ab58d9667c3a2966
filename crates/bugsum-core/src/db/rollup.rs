//! Rollup compactor: drains journal deltas into the aggregate store.
//!
//! A run holds the [`RollupLock`] for its whole duration and applies each
//! batch inside one `BEGIN IMMEDIATE` transaction. A failure anywhere in
//! a batch rolls it back and leaves its journal rows for the next run.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;

use super::columns::{KEY_COLUMNS, key_from_row};
use super::meta;
use super::store::{self, StoreError, UpsertPolicy};
use crate::config::SummaryConfig;
use crate::error::ErrorCode;
use crate::lock::{LockError, RollupLock};
use crate::model::LocationKey;

#[derive(Debug, Clone)]
pub struct RollupOptions {
    /// Journal rows per batch, oldest first; `None` takes everything.
    pub batch_size: Option<usize>,
    pub lock_path: PathBuf,
    pub lock_timeout: Duration,
    pub upsert: UpsertPolicy,
}

impl RollupOptions {
    #[must_use]
    pub fn from_config(config: &SummaryConfig, project_root: &Path) -> Self {
        Self {
            batch_size: config.rollup.batch_limit(),
            lock_path: config.rollup_lock_path(project_root),
            lock_timeout: config.rollup.lock_timeout(),
            upsert: UpsertPolicy::from(&config.upsert),
        }
    }
}

/// What one or more batches did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollupReport {
    /// Highest journal id consumed; `None` when the journal was empty.
    pub watermark: Option<i64>,
    pub journal_rows_consumed: usize,
    pub keys_applied: usize,
    /// Keys whose deltas summed to zero and were skipped.
    pub keys_cancelled: usize,
    pub zero_rows_deleted: usize,
    pub elapsed: Duration,
}

impl RollupReport {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.journal_rows_consumed == 0
    }

    fn absorb(&mut self, batch: Self) {
        self.watermark = batch.watermark.or(self.watermark);
        self.journal_rows_consumed += batch.journal_rows_consumed;
        self.keys_applied += batch.keys_applied;
        self.keys_cancelled += batch.keys_cancelled;
        self.zero_rows_deleted += batch.zero_rows_deleted;
        self.elapsed += batch.elapsed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollupOutcome {
    Completed(RollupReport),
    /// Another run holds the rollup lock; nothing was done.
    Skipped { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{}: {0}", ErrorCode::DatabaseWriteFailed.code())]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Lock(LockError),
}

impl RollupError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::Sqlite(_) => ErrorCode::DatabaseWriteFailed,
            Self::Lock(err) => err.code(),
        }
    }
}

fn acquire_lock(options: &RollupOptions) -> Result<Result<RollupLock, String>, RollupError> {
    match RollupLock::acquire(&options.lock_path, options.lock_timeout) {
        Ok(lock) => Ok(Ok(lock)),
        Err(err @ LockError::Timeout { .. }) => {
            tracing::warn!(error = %err, "rollup skipped, lock held by another run");
            Ok(Err(err.to_string()))
        }
        Err(err) => Err(RollupError::Lock(err)),
    }
}

/// Run one rollup batch under the rollup lock.
///
/// # Errors
///
/// Returns an error if the batch fails (its transaction is rolled back) or
/// the lock file cannot be opened. Lock contention is not an error.
pub fn rollup_journal(
    conn: &mut Connection,
    options: &RollupOptions,
) -> Result<RollupOutcome, RollupError> {
    let lock = match acquire_lock(options)? {
        Ok(lock) => lock,
        Err(reason) => return Ok(RollupOutcome::Skipped { reason }),
    };

    let report = rollup_batch(conn, options.batch_size, &options.upsert)?;
    lock.release();

    tracing::info!(
        watermark = ?report.watermark,
        consumed = report.journal_rows_consumed,
        keys_applied = report.keys_applied,
        zero_rows_deleted = report.zero_rows_deleted,
        elapsed_ms = report.elapsed.as_millis(),
        "bug summary rollup complete"
    );
    Ok(RollupOutcome::Completed(report))
}

/// Run batches until every entry present at the start has been rolled up,
/// holding the lock throughout.
///
/// Entries appended after the run starts are left for the next run.
///
/// # Errors
///
/// Returns the first batch failure; batches committed before it stay
/// committed.
pub fn rollup_until_empty(
    conn: &mut Connection,
    options: &RollupOptions,
) -> Result<RollupOutcome, RollupError> {
    let lock = match acquire_lock(options)? {
        Ok(lock) => lock,
        Err(reason) => return Ok(RollupOutcome::Skipped { reason }),
    };

    let ceiling: Option<i64> =
        conn.query_row("SELECT MAX(id) FROM bug_summary_journal", [], |row| row.get(0))?;
    let mut total = RollupReport::default();
    let mut batches = 0_usize;
    if let Some(ceiling) = ceiling {
        loop {
            let batch = rollup_batch_below(conn, options.batch_size, ceiling, &options.upsert)?;
            if batch.is_noop() {
                break;
            }
            batches += 1;
            total.absorb(batch);
        }
    }
    lock.release();

    tracing::info!(
        batches,
        watermark = ?total.watermark,
        consumed = total.journal_rows_consumed,
        keys_applied = total.keys_applied,
        zero_rows_deleted = total.zero_rows_deleted,
        "bug summary journal drained"
    );
    Ok(RollupOutcome::Completed(total))
}

/// Highest journal id in the next batch, never above `ceiling`.
fn watermark(
    conn: &Connection,
    batch_size: Option<usize>,
    ceiling: i64,
) -> rusqlite::Result<Option<i64>> {
    match batch_size {
        None => conn.query_row(
            "SELECT MAX(id) FROM bug_summary_journal WHERE id <= ?1",
            params![ceiling],
            |row| row.get(0),
        ),
        Some(0) => Ok(None),
        Some(limit) => conn.query_row(
            "SELECT MAX(id) FROM (
                SELECT id FROM bug_summary_journal WHERE id <= ?2 ORDER BY id LIMIT ?1
            )",
            params![i64::try_from(limit).unwrap_or(i64::MAX), ceiling],
            |row| row.get(0),
        ),
    }
}

fn summed_deltas(conn: &Connection, watermark: i64) -> rusqlite::Result<Vec<(LocationKey, i64)>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT SUM(count), {KEY_COLUMNS}
         FROM bug_summary_journal
         WHERE id <= ?1
         GROUP BY {KEY_COLUMNS}"
    ))?;
    let rows = stmt.query_map(params![watermark], |row| Ok((key_from_row(row, 1)?, row.get(0)?)))?;
    rows.collect()
}

/// Apply one batch without taking the rollup lock.
///
/// Callers must ensure no other rollup runs against the same database,
/// either by holding the lock or by owning the only connection.
///
/// # Errors
///
/// Returns an error if any step fails; the batch transaction is then
/// rolled back as a whole.
pub fn rollup_batch(
    conn: &mut Connection,
    batch_size: Option<usize>,
    policy: &UpsertPolicy,
) -> Result<RollupReport, RollupError> {
    rollup_batch_below(conn, batch_size, i64::MAX, policy)
}

/// [`rollup_batch`] restricted to journal ids up to `ceiling`.
fn rollup_batch_below(
    conn: &mut Connection,
    batch_size: Option<usize>,
    ceiling: i64,
    policy: &UpsertPolicy,
) -> Result<RollupReport, RollupError> {
    let started = Instant::now();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(watermark) = watermark(&tx, batch_size, ceiling)? else {
        tx.commit()?;
        return Ok(RollupReport {
            elapsed: started.elapsed(),
            ..RollupReport::default()
        });
    };

    let mut report = RollupReport {
        watermark: Some(watermark),
        ..RollupReport::default()
    };

    for (key, sum) in summed_deltas(&tx, watermark)? {
        match sum.signum() {
            1 => {
                store::increment(&tx, &key, sum, policy)?;
                report.keys_applied += 1;
            }
            -1 => {
                store::decrement(&tx, &key, -sum, policy)?;
                report.keys_applied += 1;
            }
            _ => report.keys_cancelled += 1,
        }
    }

    report.zero_rows_deleted = store::delete_zero_rows(&tx)?;
    report.journal_rows_consumed =
        tx.execute("DELETE FROM bug_summary_journal WHERE id <= ?1", params![watermark])?;
    meta::record_rollup(&tx, watermark, Utc::now())?;
    tx.commit()?;

    report.elapsed = started.elapsed();
    tracing::debug!(
        watermark,
        consumed = report.journal_rows_consumed,
        keys_applied = report.keys_applied,
        keys_cancelled = report.keys_cancelled,
        "rollup batch committed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::journal::{JournalWriter, journal_len, pending_entries};
    use crate::db::store::get_count;
    use crate::db::{meta::read_status, open_in_memory};
    use crate::model::{BugTaskImportance, BugTaskStatus, Target};

    fn key(product: i64, tag: Option<&str>) -> LocationKey {
        LocationKey {
            target: Target::Product {
                product,
                ociproject: None,
            },
            viewed_by: None,
            access_policy: None,
            tag: tag.map(str::to_owned),
            status: BugTaskStatus::New,
            milestone: None,
            importance: BugTaskImportance::Undecided,
            has_patch: false,
        }
    }

    fn journal(conn: &Connection, deltas: &[(LocationKey, i64)]) {
        // One append per delta so nothing coalesces before rollup.
        for delta in deltas {
            JournalWriter.append(conn, [delta.clone()]).unwrap();
        }
    }

    fn options(dir: &tempfile::TempDir, batch_size: Option<usize>) -> RollupOptions {
        RollupOptions {
            batch_size,
            lock_path: dir.path().join("summary.db.rollup.lock"),
            lock_timeout: Duration::ZERO,
            upsert: UpsertPolicy::default(),
        }
    }

    fn completed(outcome: RollupOutcome) -> RollupReport {
        match outcome {
            RollupOutcome::Completed(report) => report,
            RollupOutcome::Skipped { reason } => panic!("rollup skipped: {reason}"),
        }
    }

    #[test]
    fn rollup_sums_per_key_and_empties_journal() {
        let mut conn = open_in_memory().unwrap();
        journal(
            &conn,
            &[(key(1, None), 1), (key(1, None), 1), (key(2, None), 1), (key(1, None), -1)],
        );

        let report = rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();
        assert_eq!(report.journal_rows_consumed, 4);
        assert_eq!(report.keys_applied, 2);
        assert_eq!(get_count(&conn, &key(1, None)).unwrap(), Some(1));
        assert_eq!(get_count(&conn, &key(2, None)).unwrap(), Some(1));
        assert_eq!(journal_len(&conn).unwrap(), 0);
    }

    #[test]
    fn cancelled_keys_are_skipped_and_zero_rows_removed() {
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1)]);
        rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();

        journal(&conn, &[(key(1, None), -1), (key(2, None), 1), (key(2, None), -1)]);
        let report = rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();
        assert_eq!(report.keys_applied, 1);
        assert_eq!(report.keys_cancelled, 1);
        assert_eq!(report.zero_rows_deleted, 1);
        assert_eq!(get_count(&conn, &key(1, None)).unwrap(), None);
        assert_eq!(get_count(&conn, &key(2, None)).unwrap(), None);
    }

    #[test]
    fn second_run_is_a_noop() {
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1)]);
        rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();

        let again = rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();
        assert!(again.is_noop());
        assert_eq!(again.watermark, None);
        assert_eq!(again.keys_applied, 0);
        assert_eq!(again.zero_rows_deleted, 0);
    }

    #[test]
    fn batch_size_consumes_oldest_entries_first() {
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1), (key(2, None), 1), (key(3, None), 1)]);
        let last_id = pending_entries(&conn, None).unwrap()[2].id;

        let first = rollup_batch(&mut conn, Some(2), &UpsertPolicy::default()).unwrap();
        assert_eq!(first.journal_rows_consumed, 2);
        let left = pending_entries(&conn, None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, last_id);
        assert_eq!(get_count(&conn, &key(3, None)).unwrap(), None);

        let second = rollup_batch(&mut conn, Some(2), &UpsertPolicy::default()).unwrap();
        assert_eq!(second.journal_rows_consumed, 1);
        assert_eq!(second.watermark, Some(last_id));
        assert_eq!(get_count(&conn, &key(3, None)).unwrap(), Some(1));
    }

    #[test]
    fn zero_batch_size_does_nothing() {
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1)]);
        let report = rollup_batch(&mut conn, Some(0), &UpsertPolicy::default()).unwrap();
        assert!(report.is_noop());
        assert_eq!(journal_len(&conn).unwrap(), 1);
    }

    #[test]
    fn failed_batch_leaves_journal_and_aggregate_untouched() {
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1)]);
        rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();

        conn.execute_batch(
            "CREATE TRIGGER inject_failure BEFORE INSERT ON bug_summary
             WHEN NEW.tag = 'boom'
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
        )
        .unwrap();
        journal(&conn, &[(key(1, None), 1), (key(1, Some("boom")), 1)]);

        assert!(rollup_batch(&mut conn, None, &UpsertPolicy::default()).is_err());
        assert_eq!(journal_len(&conn).unwrap(), 2);
        assert_eq!(get_count(&conn, &key(1, None)).unwrap(), Some(1));

        conn.execute_batch("DROP TRIGGER inject_failure").unwrap();
        let retried = rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();
        assert_eq!(retried.journal_rows_consumed, 2);
        assert_eq!(get_count(&conn, &key(1, None)).unwrap(), Some(2));
        assert_eq!(get_count(&conn, &key(1, Some("boom"))).unwrap(), Some(1));
    }

    #[test]
    fn rollup_records_watermark() {
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1)]);
        let report = rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();

        let status = read_status(&conn).unwrap();
        assert_eq!(status.last_watermark, report.watermark);
        assert!(status.last_rollup_at.is_some());
    }

    #[test]
    fn held_lock_skips_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_in_memory().unwrap();
        journal(&conn, &[(key(1, None), 1)]);
        let options = options(&dir, None);

        let held = RollupLock::acquire(&options.lock_path, Duration::ZERO).unwrap();
        let outcome = rollup_journal(&mut conn, &options).unwrap();
        assert!(matches!(outcome, RollupOutcome::Skipped { ref reason } if reason.starts_with("E5002")));
        assert_eq!(journal_len(&conn).unwrap(), 1);

        held.release();
        let report = completed(rollup_journal(&mut conn, &options).unwrap());
        assert_eq!(report.journal_rows_consumed, 1);
    }

    #[test]
    fn until_empty_drains_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_in_memory().unwrap();
        let deltas: Vec<_> = (1..=7).map(|product| (key(product, None), 1)).collect();
        journal(&conn, &deltas);

        let report = completed(rollup_until_empty(&mut conn, &options(&dir, Some(3))).unwrap());
        assert_eq!(report.journal_rows_consumed, 7);
        assert_eq!(report.keys_applied, 7);
        assert_eq!(journal_len(&conn).unwrap(), 0);
    }

    #[test]
    fn until_empty_stops_at_entries_present_when_it_started() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_in_memory().unwrap();
        let deltas: Vec<_> = (1..=5).map(|product| (key(product, None), 1)).collect();
        journal(&conn, &deltas);

        // Every consumed row is replaced by a new one, like a busy writer.
        conn.execute_batch(
            "CREATE TRIGGER keep_writing AFTER DELETE ON bug_summary_journal
             BEGIN
                 INSERT INTO bug_summary_journal (count, product, status, importance, has_patch)
                 VALUES (1, 99, 'new', 'undecided', 0);
             END;",
        )
        .unwrap();

        let report = completed(rollup_until_empty(&mut conn, &options(&dir, Some(2))).unwrap());
        assert_eq!(report.journal_rows_consumed, 5);
        assert_eq!(journal_len(&conn).unwrap(), 5);
        assert_eq!(get_count(&conn, &key(99, None)).unwrap(), None);
        assert_eq!(get_count(&conn, &key(5, None)).unwrap(), Some(1));
    }

    #[test]
    fn negative_milestone_rolls_up_beside_null_milestone() {
        let mut conn = open_in_memory().unwrap();
        let mut negative = key(1, None);
        negative.milestone = Some(-1);
        journal(&conn, &[(key(1, None), 1), (negative.clone(), 1)]);

        let report = rollup_batch(&mut conn, None, &UpsertPolicy::default()).unwrap();
        assert_eq!(report.keys_applied, 2);
        assert_eq!(journal_len(&conn).unwrap(), 0);
        assert_eq!(get_count(&conn, &key(1, None)).unwrap(), Some(1));
        assert_eq!(get_count(&conn, &negative).unwrap(), Some(1));
    }

    #[test]
    fn options_follow_config() {
        let root = Path::new("/srv/project");
        let mut config = SummaryConfig::default();
        config.rollup.batch_size = 0;
        config.rollup.lock_timeout_ms = 25;

        let options = RollupOptions::from_config(&config, root);
        assert_eq!(options.batch_size, None);
        assert_eq!(options.lock_timeout, Duration::from_millis(25));
        assert_eq!(
            options.lock_path,
            root.join(".bugsum").join("summary.db.rollup.lock")
        );
    }
}
