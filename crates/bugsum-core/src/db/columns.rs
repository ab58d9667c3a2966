//! Binding [`LocationKey`]s to and from the shared key columns.
//!
//! `bug_summary` and `bug_summary_journal` use the same thirteen key
//! columns in the same order; everything here relies on that order.

use rusqlite::Row;
use rusqlite::types::{Type, Value};

use crate::model::{LocationKey, Target, TargetColumns};

/// Number of key columns.
pub const KEY_WIDTH: usize = 13;

/// Key columns, in binding order.
pub const KEY_COLUMNS: &str = "product, productseries, distribution, distroseries, \
     sourcepackagename, ociproject, viewed_by, access_policy, \
     tag, status, milestone, importance, has_patch";

/// Null-safe equality on every key column, binding `?2` through `?14`.
///
/// `?1` is left to the caller (the delta in updates).
pub const KEY_MATCH_FROM_2: &str = "product IS ?2 AND productseries IS ?3 \
     AND distribution IS ?4 AND distroseries IS ?5 \
     AND sourcepackagename IS ?6 AND ociproject IS ?7 \
     AND viewed_by IS ?8 AND access_policy IS ?9 \
     AND tag IS ?10 AND status IS ?11 AND milestone IS ?12 \
     AND importance IS ?13 AND has_patch IS ?14";

/// Null-safe equality on every key column, binding `?1` through `?13`.
pub const KEY_MATCH_FROM_1: &str = "product IS ?1 AND productseries IS ?2 \
     AND distribution IS ?3 AND distroseries IS ?4 \
     AND sourcepackagename IS ?5 AND ociproject IS ?6 \
     AND viewed_by IS ?7 AND access_policy IS ?8 \
     AND tag IS ?9 AND status IS ?10 AND milestone IS ?11 \
     AND importance IS ?12 AND has_patch IS ?13";

fn nullable(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

/// SQL values for a key, in [`KEY_COLUMNS`] order.
#[must_use]
pub fn key_values(key: &LocationKey) -> [Value; KEY_WIDTH] {
    let target = key.target.columns();
    [
        nullable(target.product),
        nullable(target.productseries),
        nullable(target.distribution),
        nullable(target.distroseries),
        nullable(target.sourcepackagename),
        nullable(target.ociproject),
        nullable(key.viewed_by),
        nullable(key.access_policy),
        key.tag.clone().map_or(Value::Null, Value::Text),
        Value::Text(key.status.as_str().to_string()),
        nullable(key.milestone),
        Value::Text(key.importance.as_str().to_string()),
        Value::Integer(i64::from(key.has_patch)),
    ]
}

fn conversion_error(
    index: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, ty, Box::new(err))
}

/// Read a key whose first column sits at `offset` in `row`.
///
/// # Errors
///
/// Returns a conversion error if a stored status, importance or target
/// combination is not valid.
pub fn key_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<LocationKey> {
    let columns = TargetColumns {
        product: row.get(offset)?,
        productseries: row.get(offset + 1)?,
        distribution: row.get(offset + 2)?,
        distroseries: row.get(offset + 3)?,
        sourcepackagename: row.get(offset + 4)?,
        ociproject: row.get(offset + 5)?,
    };
    let target =
        Target::from_columns(&columns).map_err(|err| conversion_error(offset, Type::Integer, err))?;

    let status: String = row.get(offset + 9)?;
    let importance: String = row.get(offset + 11)?;

    Ok(LocationKey {
        target,
        viewed_by: row.get(offset + 6)?,
        access_policy: row.get(offset + 7)?,
        tag: row.get(offset + 8)?,
        status: status
            .parse()
            .map_err(|err| conversion_error(offset + 9, Type::Text, err))?,
        milestone: row.get(offset + 10)?,
        importance: importance
            .parse()
            .map_err(|err| conversion_error(offset + 11, Type::Text, err))?,
        has_patch: row.get(offset + 12)?,
    })
}
