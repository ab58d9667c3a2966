//! Brute-force checks of the summary against the simulated domain.

use anyhow::Result;
use rusqlite::Connection;

use bugsum_core::db::store::all_rows;
use bugsum_core::model::{BugTaskFlat, LocationKey};
use bugsum_core::recount::{current_counts, diff_counts, expected_counts};
use bugsum_core::RollupReport;

/// Diagnostic information for a single failed invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Aggregate plus pending journal disagrees with a recount of the domain.
    Equivalence {
        key: LocationKey,
        /// Delta that would correct the stored count.
        correction: i64,
    },

    /// An aggregate row holds a negative count.
    NegativeAggregate { key: LocationKey, count: i64 },

    /// An aggregate row with count zero survived a rollup.
    ZeroRowAfterRollup { key: LocationKey },

    /// A rollup immediately after a full drain did work.
    RollupNotIdempotent { journal_rows_consumed: usize, keys_applied: usize },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equivalence { key, correction } => {
                write!(f, "Equivalence: {key} is off by {correction}")
            }
            Self::NegativeAggregate { key, count } => {
                write!(f, "NegativeAggregate: {key} has count {count}")
            }
            Self::ZeroRowAfterRollup { key } => {
                write!(f, "ZeroRowAfterRollup: {key} kept a zero row")
            }
            Self::RollupNotIdempotent {
                journal_rows_consumed,
                keys_applied,
            } => write!(
                f,
                "RollupNotIdempotent: second rollup consumed {journal_rows_consumed} rows \
                 and applied {keys_applied} keys"
            ),
        }
    }
}

/// Stateless collection of summary invariant checks.
pub struct SummaryOracle;

impl SummaryOracle {
    /// Aggregate plus pending journal equals the recount, for every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be read or an image is
    /// malformed.
    pub fn check_equivalence(
        conn: &Connection,
        images: &[BugTaskFlat],
    ) -> Result<Vec<InvariantViolation>> {
        let expected = expected_counts(images)?;
        let current = current_counts(conn)?;
        Ok(diff_counts(&expected, &current)
            .into_iter()
            .map(|(key, correction)| InvariantViolation::Equivalence { key, correction })
            .collect())
    }

    /// No aggregate row is negative; after a rollup, none is zero either.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate cannot be read.
    pub fn check_aggregate_rows(
        conn: &Connection,
        after_rollup: bool,
    ) -> Result<Vec<InvariantViolation>> {
        let mut violations = Vec::new();
        for row in all_rows(conn)? {
            if row.count < 0 {
                violations.push(InvariantViolation::NegativeAggregate {
                    key: row.key,
                    count: row.count,
                });
            } else if row.count == 0 && after_rollup {
                violations.push(InvariantViolation::ZeroRowAfterRollup { key: row.key });
            }
        }
        Ok(violations)
    }

    /// A rollup run right after a full drain must be a no-op.
    #[must_use]
    pub fn check_idempotent(second: &RollupReport) -> Vec<InvariantViolation> {
        if second.journal_rows_consumed == 0 && second.keys_applied == 0 {
            Vec::new()
        } else {
            vec![InvariantViolation::RollupNotIdempotent {
                journal_rows_consumed: second.journal_rows_consumed,
                keys_applied: second.keys_applied,
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugsum_core::db::journal::JournalWriter;
    use bugsum_core::db::open_in_memory;
    use bugsum_core::model::{BugTaskImportance, BugTaskStatus, TargetColumns};
    use bugsum_core::expand::locations;

    fn image() -> BugTaskFlat {
        BugTaskFlat {
            bugtask: 1,
            bug: 1,
            duplicate_of: None,
            target: TargetColumns {
                product: Some(1),
                ..TargetColumns::default()
            },
            status: BugTaskStatus::New,
            importance: BugTaskImportance::Undecided,
            milestone: None,
            assignee: None,
            latest_patch_uploaded: None,
            access_policies: None,
            access_grants: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn missing_journal_entry_is_an_equivalence_violation() {
        let conn = open_in_memory().unwrap();
        let violations = SummaryOracle::check_equivalence(&conn, &[image()]).unwrap();
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            violations[0],
            InvariantViolation::Equivalence { correction: 1, .. }
        ));
    }

    #[test]
    fn journaled_image_is_equivalent() {
        let conn = open_in_memory().unwrap();
        let keys = locations(&image()).unwrap();
        JournalWriter
            .append(&conn, keys.into_iter().map(|key| (key, 1)))
            .unwrap();
        assert!(SummaryOracle::check_equivalence(&conn, &[image()]).unwrap().is_empty());
    }

    #[test]
    fn negative_and_zero_rows_are_flagged() {
        let conn = open_in_memory().unwrap();
        conn.execute_batch(
            "INSERT INTO bug_summary (count, product, status, importance, has_patch)
             VALUES (-1, 1, 'new', 'undecided', 0), (0, 2, 'new', 'undecided', 0);",
        )
        .unwrap();

        let during = SummaryOracle::check_aggregate_rows(&conn, false).unwrap();
        assert_eq!(during.len(), 1);
        let after = SummaryOracle::check_aggregate_rows(&conn, true).unwrap();
        assert_eq!(after.len(), 2);
        assert!(after[1].to_string().starts_with("ZeroRowAfterRollup"));
    }

    #[test]
    fn busy_second_rollup_is_not_idempotent() {
        let report = RollupReport {
            journal_rows_consumed: 2,
            keys_applied: 1,
            ..RollupReport::default()
        };
        assert_eq!(SummaryOracle::check_idempotent(&report).len(), 1);
        assert!(SummaryOracle::check_idempotent(&RollupReport::default()).is_empty());
    }
}
