//! Rollup bookkeeping in `summary_meta`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

use super::{journal, migrations, store};

/// Point-in-time health of a summary database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryStatus {
    pub schema_version: u32,
    pub aggregate_rows: usize,
    pub journal_rows: usize,
    /// Smallest unconsumed journal id, if any.
    pub oldest_pending: Option<i64>,
    pub last_watermark: Option<i64>,
    pub last_rollup_at: Option<DateTime<Utc>>,
}

/// Record a completed rollup.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn record_rollup(conn: &Connection, watermark: i64, at: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE summary_meta SET last_watermark = ?1, last_rollup_at_us = ?2 WHERE id = 1",
        params![watermark, at.timestamp_micros()],
    )?;
    Ok(())
}

/// Read schema version, table sizes and the last rollup.
///
/// # Errors
///
/// Returns an error if any query fails.
pub fn read_status(conn: &Connection) -> rusqlite::Result<SummaryStatus> {
    let (last_watermark, last_rollup_us): (Option<i64>, Option<i64>) = conn.query_row(
        "SELECT last_watermark, last_rollup_at_us FROM summary_meta WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let oldest_pending: Option<i64> =
        conn.query_row("SELECT MIN(id) FROM bug_summary_journal", [], |row| row.get(0))?;

    Ok(SummaryStatus {
        schema_version: migrations::current_schema_version(conn)?,
        aggregate_rows: store::row_count(conn)?,
        journal_rows: journal::journal_len(conn)?,
        oldest_pending,
        last_watermark,
        last_rollup_at: last_rollup_us.and_then(DateTime::from_timestamp_micros),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn fresh_database_has_no_rollup() {
        let conn = open_in_memory().unwrap();
        let status = read_status(&conn).unwrap();
        assert_eq!(status.schema_version, migrations::LATEST_SCHEMA_VERSION);
        assert_eq!(status.aggregate_rows, 0);
        assert_eq!(status.journal_rows, 0);
        assert_eq!(status.oldest_pending, None);
        assert_eq!(status.last_watermark, None);
        assert_eq!(status.last_rollup_at, None);
    }

    #[test]
    fn recorded_rollup_reads_back() {
        let conn = open_in_memory().unwrap();
        let at = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        record_rollup(&conn, 42, at).unwrap();

        let status = read_status(&conn).unwrap();
        assert_eq!(status.last_watermark, Some(42));
        assert_eq!(status.last_rollup_at, Some(at));
    }
}
