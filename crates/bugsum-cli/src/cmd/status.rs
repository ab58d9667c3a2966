//! `bugsum status`: journal backlog and last rollup at a glance.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use bugsum_core::db::meta::{self, SummaryStatus};
use chrono::SecondsFormat;
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
struct StatusOutput {
    database: String,
    #[serde(flatten)]
    status: SummaryStatus,
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Execute `bugsum status`.
///
/// # Errors
///
/// Returns an error if the database is missing or cannot be read.
pub fn run_status(_args: &StatusArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let (config, conn) = super::open_summary(project_root, output)?;
    let report = StatusOutput {
        database: config.db_path(project_root).display().to_string(),
        status: meta::read_status(&conn)?,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            let s = &r.status;
            writeln!(
                w,
                "status schema_version={} aggregate_rows={} journal_rows={} oldest_pending={} last_watermark={} last_rollup_at={}",
                s.schema_version,
                s.aggregate_rows,
                s.journal_rows,
                optional(s.oldest_pending),
                optional(s.last_watermark),
                optional(s.last_rollup_at.map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)))
            )
        },
        |r, w| {
            let s = &r.status;
            pretty_section(w, "Bug summary")?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Schema version", s.schema_version.to_string())?;
            pretty_kv(w, "Aggregate rows", s.aggregate_rows.to_string())?;
            pretty_kv(w, "Journal rows", s.journal_rows.to_string())?;
            pretty_kv(w, "Oldest pending", optional(s.oldest_pending))?;
            pretty_kv(w, "Last watermark", optional(s.last_watermark))?;
            pretty_kv(
                w,
                "Last rollup",
                s.last_rollup_at.map_or_else(
                    || "never".to_string(),
                    |at| at.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
            )
        },
    )
}
