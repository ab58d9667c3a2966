use std::io::Write;
use std::path::Path;

use anyhow::Result;
use bugsum_core::{RollupOptions, RollupOutcome, RollupReport, rollup_journal, rollup_until_empty};
use clap::Args;

use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct RollupArgs {
    /// Journal rows to consume, oldest first (overrides `[rollup] batch_size`;
    /// 0 means the whole journal, as in the config).
    #[arg(long, conflicts_with = "all")]
    pub batch_size: Option<usize>,

    /// Consume the whole journal in one batch.
    #[arg(long)]
    pub all: bool,

    /// Keep running batches until the journal is empty.
    #[arg(long)]
    pub until_empty: bool,
}

impl RollupArgs {
    fn apply_to(&self, options: &mut RollupOptions) {
        if self.all {
            options.batch_size = None;
        } else if let Some(size) = self.batch_size {
            options.batch_size = (size > 0).then_some(size);
        }
    }
}

fn watermark_label(report: &RollupReport) -> String {
    report
        .watermark
        .map_or_else(|| "-".to_string(), |id| id.to_string())
}

/// Execute `bugsum rollup`.
///
/// Lock contention is reported as `skipped` and is not a failure.
///
/// # Errors
///
/// Returns an error if the database is missing or a batch fails. A failed
/// batch leaves its journal rows in place.
pub fn run_rollup(args: &RollupArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (config, mut conn) = super::open_summary(project_root, output)?;
    let mut options = RollupOptions::from_config(&config, project_root);
    args.apply_to(&mut options);

    let outcome = if args.until_empty {
        rollup_until_empty(&mut conn, &options)
    } else {
        rollup_journal(&mut conn, &options)
    }
    .map_err(|err| fail(output, CliError::with_code(err.code(), err.to_string())))?;

    render_mode(
        output,
        &outcome,
        |outcome, w| match outcome {
            RollupOutcome::Completed(report) => writeln!(
                w,
                "rollup completed watermark={} consumed={} keys_applied={} keys_cancelled={} zero_rows_deleted={} elapsed_ms={}",
                watermark_label(report),
                report.journal_rows_consumed,
                report.keys_applied,
                report.keys_cancelled,
                report.zero_rows_deleted,
                report.elapsed.as_millis()
            ),
            RollupOutcome::Skipped { reason } => writeln!(w, "rollup skipped reason={reason}"),
        },
        |outcome, w| match outcome {
            RollupOutcome::Completed(report) if report.is_noop() => {
                writeln!(w, "✓ Journal already empty, nothing to roll up.")
            }
            RollupOutcome::Completed(report) => {
                pretty_section(w, "Rollup complete")?;
                pretty_kv(w, "Watermark", watermark_label(report))?;
                pretty_kv(w, "Journal rows", report.journal_rows_consumed.to_string())?;
                pretty_kv(w, "Keys applied", report.keys_applied.to_string())?;
                pretty_kv(w, "Keys cancelled", report.keys_cancelled.to_string())?;
                pretty_kv(w, "Zero rows deleted", report.zero_rows_deleted.to_string())?;
                pretty_kv(w, "Elapsed", format!("{} ms", report.elapsed.as_millis()))
            }
            RollupOutcome::Skipped { reason } => {
                writeln!(w, "Rollup skipped: {reason}")?;
                writeln!(w, "The next scheduled run will pick up the journal.")
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugsum_core::config::SummaryConfig;

    fn options() -> RollupOptions {
        RollupOptions::from_config(&SummaryConfig::default(), Path::new("/tmp/project"))
    }

    #[test]
    fn config_batch_size_is_the_default() {
        let args = RollupArgs {
            batch_size: None,
            all: false,
            until_empty: false,
        };
        let mut opts = options();
        args.apply_to(&mut opts);
        assert_eq!(opts.batch_size, Some(10_000));
    }

    #[test]
    fn flags_override_config() {
        let mut opts = options();
        RollupArgs {
            batch_size: Some(25),
            all: false,
            until_empty: false,
        }
        .apply_to(&mut opts);
        assert_eq!(opts.batch_size, Some(25));

        RollupArgs {
            batch_size: None,
            all: true,
            until_empty: false,
        }
        .apply_to(&mut opts);
        assert_eq!(opts.batch_size, None);
    }

    #[test]
    fn zero_batch_size_takes_the_whole_journal() {
        let mut opts = options();
        RollupArgs {
            batch_size: Some(0),
            all: false,
            until_empty: false,
        }
        .apply_to(&mut opts);
        assert_eq!(opts.batch_size, None);
    }
}
