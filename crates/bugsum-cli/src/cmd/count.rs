use std::io::Write;
use std::path::Path;

use anyhow::Result;
use bugsum_core::db::view::{self, Match, SummaryFilter, SummaryRow};
use bugsum_core::error::ErrorCode;
use bugsum_core::model::{BugTaskImportance, BugTaskStatus};
use clap::Args;
use serde::Serialize;

use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};

/// Partial location key. Unset dimensions match any value.
///
/// Rows for a package also exist as rows for the package's distribution or
/// series with no package, so a distribution-wide count wants `--no-package`.
/// Likewise a private bug has one row per viewer; `--public` or `--viewer`
/// avoids counting it more than once.
#[derive(Args, Debug, Default)]
pub struct CountArgs {
    #[arg(long)]
    pub product: Option<i64>,

    #[arg(long)]
    pub productseries: Option<i64>,

    #[arg(long)]
    pub distribution: Option<i64>,

    #[arg(long)]
    pub distroseries: Option<i64>,

    #[arg(long, conflicts_with = "no_package")]
    pub sourcepackagename: Option<i64>,

    /// Only rows not specialized to a source package.
    #[arg(long)]
    pub no_package: bool,

    #[arg(long, conflicts_with = "no_ociproject")]
    pub ociproject: Option<i64>,

    /// Only rows not specialized to an OCI project.
    #[arg(long)]
    pub no_ociproject: bool,

    #[arg(long, conflicts_with = "no_tag")]
    pub tag: Option<String>,

    /// Only the untagged rows (every task has one).
    #[arg(long)]
    pub no_tag: bool,

    #[arg(long)]
    pub status: Option<BugTaskStatus>,

    #[arg(long)]
    pub importance: Option<BugTaskImportance>,

    #[arg(long)]
    pub milestone: Option<i64>,

    /// Rows visible to this person through an access grant.
    #[arg(long, conflicts_with_all = ["policy", "public"])]
    pub viewer: Option<i64>,

    /// Rows visible through this access policy.
    #[arg(long, conflicts_with = "public")]
    pub policy: Option<i64>,

    /// Only rows for public bugs.
    #[arg(long)]
    pub public: bool,

    #[arg(long, conflicts_with = "no_patch")]
    pub has_patch: bool,

    #[arg(long)]
    pub no_patch: bool,

    /// Also list the aggregate rows and pending deltas behind the count.
    #[arg(long)]
    pub rows: bool,
}

fn id_match(value: Option<i64>, null: bool) -> Match<i64> {
    if null {
        Match::Null
    } else {
        value.map_or(Match::Any, Match::Eq)
    }
}

impl CountArgs {
    fn filter(&self) -> SummaryFilter {
        SummaryFilter {
            product: id_match(self.product, false),
            productseries: id_match(self.productseries, false),
            distribution: id_match(self.distribution, false),
            distroseries: id_match(self.distroseries, false),
            sourcepackagename: id_match(self.sourcepackagename, self.no_package),
            ociproject: id_match(self.ociproject, self.no_ociproject),
            viewed_by: id_match(self.viewer, self.public),
            access_policy: id_match(self.policy, self.public),
            tag: if self.no_tag {
                Match::Null
            } else {
                self.tag.clone().map_or(Match::Any, Match::Eq)
            },
            status: self.status.map(BugTaskStatus::flatten),
            milestone: id_match(self.milestone, false),
            importance: self.importance,
            has_patch: if self.has_patch {
                Some(true)
            } else if self.no_patch {
                Some(false)
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CountOutput {
    count: i64,
    aggregate_rows: usize,
    pending_deltas: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<Vec<SummaryRow>>,
}

/// Execute `bugsum count`: the current count for a partial key, summed
/// over aggregate rows and pending journal deltas.
///
/// # Errors
///
/// Returns an error if the database is missing or the query fails.
pub fn run_count(args: &CountArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (_config, conn) = super::open_summary(project_root, output)?;
    let filter = args.filter();
    let rows = view::combined_rows(&conn, &filter).map_err(|err| {
        fail(
            output,
            CliError::with_code(ErrorCode::CorruptSummary, err.to_string()),
        )
    })?;

    let pending_deltas = rows
        .iter()
        .filter(|row| matches!(row, SummaryRow::PendingDelta { .. }))
        .count();
    let result = CountOutput {
        count: rows.iter().map(SummaryRow::contribution).sum(),
        aggregate_rows: rows.len() - pending_deltas,
        pending_deltas,
        rows: args.rows.then_some(rows),
    };

    render_mode(
        output,
        &result,
        |r, w| {
            writeln!(w, "{}", r.count)?;
            for row in r.rows.iter().flatten() {
                match row {
                    SummaryRow::Aggregate { id, key, count } => {
                        writeln!(w, "aggregate id={id} count={count} {key}")?;
                    }
                    SummaryRow::PendingDelta {
                        journal_id,
                        key,
                        delta,
                    } => writeln!(w, "pending id={journal_id} delta={delta:+} {key}")?,
                }
            }
            Ok(())
        },
        |r, w| {
            pretty_kv(w, "Count", r.count.to_string())?;
            pretty_kv(w, "Aggregate rows", r.aggregate_rows.to_string())?;
            pretty_kv(w, "Pending deltas", r.pending_deltas.to_string())?;
            if let Some(rows) = &r.rows {
                writeln!(w)?;
                pretty_section(w, "Rows")?;
                for row in rows {
                    writeln!(w, "{:>+6}  {}", row.contribution(), row.key())?;
                }
            }
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_args_match_everything() {
        assert_eq!(CountArgs::default().filter(), SummaryFilter::default());
    }

    #[test]
    fn null_flags_become_null_matches() {
        let args = CountArgs {
            distribution: Some(3),
            no_package: true,
            no_tag: true,
            public: true,
            ..CountArgs::default()
        };
        let filter = args.filter();
        assert_eq!(filter.distribution, Match::Eq(3));
        assert_eq!(filter.sourcepackagename, Match::Null);
        assert_eq!(filter.tag, Match::Null);
        assert_eq!(filter.viewed_by, Match::Null);
        assert_eq!(filter.access_policy, Match::Null);
        assert_eq!(filter.ociproject, Match::Any);
    }

    #[test]
    fn patch_flags_map_to_has_patch() {
        let with = CountArgs {
            has_patch: true,
            ..CountArgs::default()
        };
        let without = CountArgs {
            no_patch: true,
            ..CountArgs::default()
        };
        assert_eq!(with.filter().has_patch, Some(true));
        assert_eq!(without.filter().has_patch, Some(false));
        assert_eq!(CountArgs::default().filter().has_patch, None);
    }

    #[test]
    fn tag_and_status_pass_through() {
        let args = CountArgs {
            product: Some(10),
            tag: Some("crash".into()),
            status: Some(BugTaskStatus::Triaged),
            ..CountArgs::default()
        };
        let filter = args.filter();
        assert_eq!(filter, SummaryFilter::default().product(10).tag("crash").status(BugTaskStatus::Triaged));
    }

    #[test]
    fn incomplete_substatus_is_flattened() {
        let args = CountArgs {
            status: Some(BugTaskStatus::IncompleteWithResponse),
            ..CountArgs::default()
        };
        assert_eq!(args.filter().status, Some(BugTaskStatus::Incomplete));
    }
}
