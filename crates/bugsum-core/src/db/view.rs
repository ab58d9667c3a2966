//! Combined view: aggregate rows plus unconsumed journal deltas.
//!
//! Journal entries are not pre-summed. A caller wanting the current count
//! for a key sums every matching row from both sources, which
//! [`count`] does for a filter.

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;

use super::columns::{KEY_COLUMNS, key_from_row};
use crate::model::{BugTaskImportance, BugTaskStatus, LocationKey};

/// One row of the combined view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SummaryRow {
    Aggregate { id: i64, key: LocationKey, count: i64 },
    PendingDelta { journal_id: i64, key: LocationKey, delta: i64 },
}

impl SummaryRow {
    #[must_use]
    pub const fn key(&self) -> &LocationKey {
        match self {
            Self::Aggregate { key, .. } | Self::PendingDelta { key, .. } => key,
        }
    }

    /// Contribution of this row to its key's current count.
    #[must_use]
    pub const fn contribution(&self) -> i64 {
        match self {
            Self::Aggregate { count, .. } => *count,
            Self::PendingDelta { delta, .. } => *delta,
        }
    }
}

/// Constraint on one nullable key dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Match<T> {
    #[default]
    Any,
    Null,
    Eq(T),
}

impl From<i64> for Match<i64> {
    fn from(value: i64) -> Self {
        Self::Eq(value)
    }
}

impl From<&str> for Match<String> {
    fn from(value: &str) -> Self {
        Self::Eq(value.to_owned())
    }
}

impl<T> Match<T> {
    /// `None` means "must be NULL".
    pub fn exactly(value: Option<T>) -> Self {
        value.map_or(Self::Null, Self::Eq)
    }
}

/// Partial location key used to select combined-view rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryFilter {
    pub product: Match<i64>,
    pub productseries: Match<i64>,
    pub distribution: Match<i64>,
    pub distroseries: Match<i64>,
    pub sourcepackagename: Match<i64>,
    pub ociproject: Match<i64>,
    pub viewed_by: Match<i64>,
    pub access_policy: Match<i64>,
    pub tag: Match<String>,
    pub status: Option<BugTaskStatus>,
    pub milestone: Match<i64>,
    pub importance: Option<BugTaskImportance>,
    pub has_patch: Option<bool>,
}

macro_rules! match_setter {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[must_use]
            pub fn $name(mut self, value: impl Into<Match<$ty>>) -> Self {
                self.$name = value.into();
                self
            }
        )*
    };
}

impl SummaryFilter {
    /// Filter matching exactly one key.
    #[must_use]
    pub fn exact(key: &LocationKey) -> Self {
        let target = key.target.columns();
        Self {
            product: Match::exactly(target.product),
            productseries: Match::exactly(target.productseries),
            distribution: Match::exactly(target.distribution),
            distroseries: Match::exactly(target.distroseries),
            sourcepackagename: Match::exactly(target.sourcepackagename),
            ociproject: Match::exactly(target.ociproject),
            viewed_by: Match::exactly(key.viewed_by),
            access_policy: Match::exactly(key.access_policy),
            tag: Match::exactly(key.tag.clone()),
            status: Some(key.status.flatten()),
            milestone: Match::exactly(key.milestone),
            importance: Some(key.importance),
            has_patch: Some(key.has_patch),
        }
    }

    match_setter! {
        product: i64,
        productseries: i64,
        distribution: i64,
        distroseries: i64,
        sourcepackagename: i64,
        ociproject: i64,
        viewed_by: i64,
        access_policy: i64,
        tag: String,
        milestone: i64,
    }

    /// Stored statuses are flattened, so the incomplete sub-states select
    /// `incomplete` rows.
    #[must_use]
    pub const fn status(mut self, status: BugTaskStatus) -> Self {
        self.status = Some(status.flatten());
        self
    }

    #[must_use]
    pub const fn importance(mut self, importance: BugTaskImportance) -> Self {
        self.importance = Some(importance);
        self
    }

    #[must_use]
    pub const fn has_patch(mut self, has_patch: bool) -> Self {
        self.has_patch = Some(has_patch);
        self
    }

    /// WHERE clause and its numbered parameters.
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        let mut push = |column: &str, matcher: Match<Value>| match matcher {
            Match::Any => {}
            Match::Null => clauses.push(format!("{column} IS NULL")),
            Match::Eq(value) => {
                params.push(value);
                clauses.push(format!("{column} = ?{}", params.len()));
            }
        };

        let int = |m: &Match<i64>| match m {
            Match::Any => Match::Any,
            Match::Null => Match::Null,
            Match::Eq(v) => Match::Eq(Value::Integer(*v)),
        };
        let required = |value: Option<Value>| value.map_or(Match::Any, Match::Eq);

        push("product", int(&self.product));
        push("productseries", int(&self.productseries));
        push("distribution", int(&self.distribution));
        push("distroseries", int(&self.distroseries));
        push("sourcepackagename", int(&self.sourcepackagename));
        push("ociproject", int(&self.ociproject));
        push("viewed_by", int(&self.viewed_by));
        push("access_policy", int(&self.access_policy));
        push(
            "tag",
            match &self.tag {
                Match::Any => Match::Any,
                Match::Null => Match::Null,
                Match::Eq(tag) => Match::Eq(Value::Text(tag.clone())),
            },
        );
        push(
            "status",
            required(self.status.map(|s| Value::Text(s.flatten().as_str().to_owned()))),
        );
        push("milestone", int(&self.milestone));
        push(
            "importance",
            required(self.importance.map(|i| Value::Text(i.as_str().to_owned()))),
        );
        push(
            "has_patch",
            required(self.has_patch.map(|p| Value::Integer(i64::from(p)))),
        );

        let sql = if clauses.is_empty() {
            "1".to_owned()
        } else {
            clauses.join(" AND ")
        };
        (sql, params)
    }
}

/// Every aggregate row and pending journal delta matching `filter`.
///
/// Aggregate rows come first in id order, then journal entries in id order.
///
/// # Errors
///
/// Returns an error if the query fails or a stored key is invalid.
pub fn combined_rows(conn: &Connection, filter: &SummaryFilter) -> rusqlite::Result<Vec<SummaryRow>> {
    let (predicate, params) = filter.where_clause();
    let sql = format!(
        "SELECT 0 AS source, id, count, {KEY_COLUMNS} FROM bug_summary WHERE {predicate}
         UNION ALL
         SELECT 1 AS source, id, count, {KEY_COLUMNS} FROM bug_summary_journal WHERE {predicate}
         ORDER BY source, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        let source: i64 = row.get(0)?;
        let id: i64 = row.get(1)?;
        let count: i64 = row.get(2)?;
        let key = key_from_row(row, 3)?;
        Ok(if source == 0 {
            SummaryRow::Aggregate { id, key, count }
        } else {
            SummaryRow::PendingDelta {
                journal_id: id,
                key,
                delta: count,
            }
        })
    })?;
    rows.collect()
}

/// Current count across every key matching `filter`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count(conn: &Connection, filter: &SummaryFilter) -> rusqlite::Result<i64> {
    Ok(combined_rows(conn, filter)?
        .iter()
        .map(SummaryRow::contribution)
        .sum())
}
