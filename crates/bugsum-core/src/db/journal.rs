//! Append-only delta journal.
//!
//! The journal writer never begins or commits a transaction. It writes on
//! whatever connection or transaction the caller holds, so its rows commit
//! or roll back together with the domain mutation that produced them.

use std::collections::BTreeMap;

use rusqlite::{Connection, params, params_from_iter};
use rusqlite::types::Value;
use serde::Serialize;

use super::columns::{KEY_COLUMNS, key_from_row, key_values};
use crate::model::LocationKey;

/// One unconsumed journal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub id: i64,
    pub key: LocationKey,
    pub delta: i64,
}

/// What a single [`JournalWriter::append`] call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JournalAppend {
    /// Rows inserted, one per key with a non-zero net delta.
    pub entries_written: usize,
    /// Keys whose deltas summed to zero within the batch and were dropped.
    pub keys_cancelled: usize,
}

impl JournalAppend {
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            entries_written: self.entries_written + other.entries_written,
            keys_cancelled: self.keys_cancelled + other.keys_cancelled,
        }
    }
}

/// Sum same-key deltas, keeping only keys with a non-zero total.
///
/// Returns the surviving deltas in key order and the number of keys that
/// cancelled out.
pub fn coalesce<I>(deltas: I) -> (Vec<(LocationKey, i64)>, usize)
where
    I: IntoIterator<Item = (LocationKey, i64)>,
{
    let mut summed: BTreeMap<LocationKey, i64> = BTreeMap::new();
    for (key, delta) in deltas {
        *summed.entry(key).or_insert(0) += delta;
    }
    let total = summed.len();
    let kept: Vec<_> = summed.into_iter().filter(|(_, delta)| *delta != 0).collect();
    let cancelled = total - kept.len();
    (kept, cancelled)
}

/// Writes coalesced deltas into `bug_summary_journal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalWriter;

impl JournalWriter {
    /// Coalesce `deltas` by key and append one journal row per surviving key.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails; the caller's transaction should
    /// then be rolled back.
    pub fn append<I>(&self, conn: &Connection, deltas: I) -> rusqlite::Result<JournalAppend>
    where
        I: IntoIterator<Item = (LocationKey, i64)>,
    {
        let (kept, keys_cancelled) = coalesce(deltas);
        if kept.is_empty() {
            return Ok(JournalAppend {
                entries_written: 0,
                keys_cancelled,
            });
        }

        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO bug_summary_journal (count, {KEY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ))?;
        for (key, delta) in &kept {
            let values = key_values(key);
            stmt.execute(params_from_iter(
                std::iter::once(Value::Integer(*delta)).chain(values),
            ))?;
        }

        tracing::debug!(
            entries_written = kept.len(),
            keys_cancelled,
            "appended bug summary journal entries"
        );

        Ok(JournalAppend {
            entries_written: kept.len(),
            keys_cancelled,
        })
    }
}

/// Number of unconsumed journal rows.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn journal_len(conn: &Connection) -> rusqlite::Result<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM bug_summary_journal", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Unconsumed journal rows in ascending id order, optionally limited.
///
/// # Errors
///
/// Returns an error if the query fails or a stored key is invalid.
pub fn pending_entries(conn: &Connection, limit: Option<usize>) -> rusqlite::Result<Vec<JournalEntry>> {
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, count, {KEY_COLUMNS} FROM bug_summary_journal ORDER BY id LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(JournalEntry {
            id: row.get(0)?,
            delta: row.get(1)?,
            key: key_from_row(row, 2)?,
        })
    })?;
    rows.collect()
}
