//! `bugsum verify` and `bugsum rebuild`: recount from a task snapshot.
//!
//! The snapshot is a JSON array of bug task images, one per task, exported
//! from the system of record.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use bugsum_core::error::ErrorCode;
use bugsum_core::recount::{self, VerifyReport};
use clap::Args;

use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};

/// Mismatched keys listed in pretty output before truncating.
const PRETTY_MISMATCH_LIMIT: usize = 20;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// JSON array of bug task images.
    #[arg(long, value_name = "SNAPSHOT")]
    pub tasks: PathBuf,
}

#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// JSON array of bug task images.
    #[arg(long, value_name = "SNAPSHOT")]
    pub tasks: PathBuf,
}

fn write_text(report: &VerifyReport, w: &mut dyn Write) -> std::io::Result<()> {
    write!(
        w,
        "verify consistent={} keys_checked={} mismatches={} negative_keys={}",
        report.is_consistent(),
        report.keys_checked,
        report.mismatches.len(),
        report.negative_keys
    )?;
    if let Some(journal) = report.journal {
        write!(w, " entries_written={}", journal.entries_written)?;
    }
    writeln!(w)?;
    for (key, correction) in &report.mismatches {
        writeln!(w, "mismatch correction={correction:+} {key}")?;
    }
    Ok(())
}

fn write_pretty(report: &VerifyReport, w: &mut dyn Write) -> std::io::Result<()> {
    if report.is_consistent() {
        writeln!(
            w,
            "✓ Summary matches the snapshot ({} keys checked).",
            report.keys_checked
        )?;
    } else {
        pretty_section(w, "Summary out of step with snapshot")?;
        pretty_kv(w, "Keys checked", report.keys_checked.to_string())?;
        pretty_kv(w, "Mismatches", report.mismatches.len().to_string())?;
        pretty_kv(w, "Negative keys", report.negative_keys.to_string())?;
        writeln!(w)?;
        for (key, correction) in report.mismatches.iter().take(PRETTY_MISMATCH_LIMIT) {
            writeln!(w, "{correction:>+6}  {key}")?;
        }
        if report.mismatches.len() > PRETTY_MISMATCH_LIMIT {
            writeln!(
                w,
                "  … {} more (use --format text for all)",
                report.mismatches.len() - PRETTY_MISMATCH_LIMIT
            )?;
        }
    }
    if let Some(journal) = report.journal {
        writeln!(w)?;
        pretty_kv(w, "Journaled", format!("{} corrections", journal.entries_written))?;
        writeln!(w, "Run `bugsum rollup --until-empty` to apply them.")?;
    }
    Ok(())
}

fn recount_error(output: OutputMode, err: &recount::RecountError) -> anyhow::Error {
    fail(output, CliError::with_code(err.code(), err.to_string()))
}

/// Execute `bugsum verify`. Read-only.
///
/// # Errors
///
/// Returns an error if the snapshot or database cannot be read, and an
/// `E3001` error if the summary does not match the snapshot.
pub fn run_verify(args: &VerifyArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (_config, conn) = super::open_summary(project_root, output)?;
    let tasks = super::read_tasks(&args.tasks)?;
    let report = recount::verify(&conn, &tasks).map_err(|err| recount_error(output, &err))?;

    render_mode(output, &report, write_text, write_pretty)?;

    if report.is_consistent() {
        Ok(())
    } else {
        anyhow::bail!(
            "{}: {} keys out of step with the snapshot",
            ErrorCode::CorruptSummary.code(),
            report.mismatches.len()
        )
    }
}

/// Execute `bugsum rebuild`: journal the corrections that bring the
/// summary in line with the snapshot.
///
/// # Errors
///
/// Returns an error if the snapshot or database cannot be read or the
/// corrections cannot be journaled.
pub fn run_rebuild(args: &RebuildArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (_config, mut conn) = super::open_summary(project_root, output)?;
    let tasks = super::read_tasks(&args.tasks)?;
    let report = recount::repair(&mut conn, &tasks).map_err(|err| recount_error(output, &err))?;

    render_mode(output, &report, write_text, write_pretty)
}
