//! Aggregate store: the durable count per location key.
//!
//! All writes go through [`try_apply`], an UPDATE-then-INSERT upsert. A
//! concurrent insert of the same key surfaces as [`Conflict`] and is retried
//! by [`apply_delta`] under an [`UpsertPolicy`].

use std::thread;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, ffi, params_from_iter};
use rusqlite::types::Value;
use serde::Serialize;

use super::columns::{KEY_COLUMNS, KEY_MATCH_FROM_1, KEY_MATCH_FROM_2, key_from_row, key_values};
use crate::config::UpsertConfig;
use crate::error::ErrorCode;
use crate::model::LocationKey;

/// A delta landed on the aggregate row for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub row_id: i64,
    /// Count after the delta.
    pub count: i64,
    /// The row did not exist and was inserted.
    pub created: bool,
}

/// Another writer inserted the same key between our UPDATE and INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict;

/// Retry bounds for [`apply_delta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for UpsertPolicy {
    fn default() -> Self {
        Self::from(&UpsertConfig::default())
    }
}

impl From<&UpsertConfig> for UpsertPolicy {
    fn from(config: &UpsertConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl UpsertPolicy {
    /// Sleep before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `backoff_max`.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |delay| delay.min(self.backoff_max))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: gave up applying delta to {key} after {attempts} attempts", ErrorCode::UpsertRetriesExhausted.code())]
    RetriesExhausted { key: Box<LocationKey>, attempts: u32 },

    #[error("{}: {0}", ErrorCode::DatabaseWriteFailed.code())]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RetriesExhausted { .. } => ErrorCode::UpsertRetriesExhausted,
            Self::Sqlite(_) => ErrorCode::DatabaseWriteFailed,
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
    )
}

/// One upsert attempt: UPDATE the matching row, else INSERT a new one.
///
/// Key columns compare with `IS`, so `NULL` matches `NULL`.
///
/// # Errors
///
/// Returns an error for any SQLite failure other than a unique-key
/// collision on insert, which is reported as `Ok(Err(Conflict))`.
pub fn try_apply(
    conn: &Connection,
    key: &LocationKey,
    delta: i64,
) -> rusqlite::Result<Result<Applied, Conflict>> {
    let values = key_values(key);

    let updated = conn
        .prepare_cached(&format!(
            "UPDATE bug_summary SET count = count + ?1 WHERE {KEY_MATCH_FROM_2} RETURNING id, count"
        ))?
        .query_row(
            params_from_iter(std::iter::once(Value::Integer(delta)).chain(values.clone())),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((row_id, count)) = updated {
        return Ok(Ok(Applied {
            row_id,
            count,
            created: false,
        }));
    }

    let inserted = conn
        .prepare_cached(&format!(
            "INSERT INTO bug_summary (count, {KEY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             RETURNING id"
        ))?
        .query_row(
            params_from_iter(std::iter::once(Value::Integer(delta)).chain(values)),
            |row| row.get(0),
        );

    match inserted {
        Ok(row_id) => Ok(Ok(Applied {
            row_id,
            count: delta,
            created: true,
        })),
        Err(err) if is_unique_violation(&err) => Ok(Err(Conflict)),
        Err(err) => Err(err),
    }
}

/// Apply `delta` to `key`, retrying conflicts with exponential backoff.
///
/// # Errors
///
/// Returns [`StoreError::RetriesExhausted`] once `policy.max_retries`
/// retries have all conflicted, or [`StoreError::Sqlite`] on any other
/// database failure.
pub fn apply_delta(
    conn: &Connection,
    key: &LocationKey,
    delta: i64,
    policy: &UpsertPolicy,
) -> Result<Applied, StoreError> {
    let mut retry = 0;
    loop {
        match try_apply(conn, key, delta)? {
            Ok(applied) => return Ok(applied),
            Err(Conflict) if retry < policy.max_retries => {
                retry += 1;
                let delay = policy.backoff(retry);
                tracing::debug!(%key, retry, ?delay, "aggregate upsert conflicted, retrying");
                thread::sleep(delay);
            }
            Err(Conflict) => {
                tracing::warn!(%key, attempts = retry + 1, "aggregate upsert retries exhausted");
                return Err(StoreError::RetriesExhausted {
                    key: Box::new(key.clone()),
                    attempts: retry + 1,
                });
            }
        }
    }
}

/// Add a positive amount to `key`.
///
/// # Errors
///
/// See [`apply_delta`].
pub fn increment(
    conn: &Connection,
    key: &LocationKey,
    amount: i64,
    policy: &UpsertPolicy,
) -> Result<Applied, StoreError> {
    debug_assert!(amount > 0);
    apply_delta(conn, key, amount, policy)
}

/// Subtract a positive amount from `key`.
///
/// # Errors
///
/// See [`apply_delta`].
pub fn decrement(
    conn: &Connection,
    key: &LocationKey,
    amount: i64,
    policy: &UpsertPolicy,
) -> Result<Applied, StoreError> {
    debug_assert!(amount > 0);
    apply_delta(conn, key, -amount, policy)
}

/// Delete every aggregate row whose count is exactly zero.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_zero_rows(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM bug_summary WHERE count = 0", [])
}

/// Rolled-up count for one key, ignoring unconsumed journal entries.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_count(conn: &Connection, key: &LocationKey) -> rusqlite::Result<Option<i64>> {
    conn.prepare_cached(&format!("SELECT count FROM bug_summary WHERE {KEY_MATCH_FROM_1}"))?
        .query_row(params_from_iter(key_values(key)), |row| row.get(0))
        .optional()
}

/// One aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRow {
    pub id: i64,
    pub key: LocationKey,
    pub count: i64,
}

/// Every aggregate row, in id order.
///
/// # Errors
///
/// Returns an error if the query fails or a stored key is invalid.
pub fn all_rows(conn: &Connection) -> rusqlite::Result<Vec<AggregateRow>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT id, count, {KEY_COLUMNS} FROM bug_summary ORDER BY id"))?;
    let rows = stmt.query_map([], |row| {
        Ok(AggregateRow {
            id: row.get(0)?,
            count: row.get(1)?,
            key: key_from_row(row, 2)?,
        })
    })?;
    rows.collect()
}

/// Number of aggregate rows.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn row_count(conn: &Connection) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM bug_summary", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}
