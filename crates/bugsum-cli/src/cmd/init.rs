use std::io::Write;
use std::path::Path;

use anyhow::Result;
use bugsum_core::config::{self, STATE_DIR, SummaryConfig};
use bugsum_core::db::{self, migrations};
use clap::Args;
use serde::Serialize;

use crate::output::{CliError, OutputMode, fail, pretty_kv, render_mode};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.bugsum/config.toml` with defaults.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitOutput {
    config: String,
    database: String,
    schema_version: u32,
    config_written: bool,
}

/// Execute `bugsum init`. Creates:
///
/// ```text
/// .bugsum/
///   config.toml   (defaults, unless one exists)
///   summary.db    (migrated; path follows [database] path)
/// ```
///
/// Re-running on an initialized project only migrates the database.
///
/// # Errors
///
/// Returns an error if the config cannot be written or the database
/// cannot be created or migrated.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let config_path = config::config_path(project_root);
    let existing = config_path.exists() && !args.force;

    let config = if existing {
        super::load_config(project_root, output)?
    } else {
        let config = SummaryConfig::default();
        config::write_config(project_root, &config)?;
        config
    };

    let db_path = config.db_path(project_root);
    let conn = db::open_summary_db(&db_path).map_err(|err| {
        fail(
            output,
            CliError::with_code(
                bugsum_core::error::ErrorCode::DatabaseWriteFailed,
                format!("{err:#}"),
            ),
        )
    })?;
    let schema_version = migrations::current_schema_version(&conn)?;

    tracing::info!(
        db = %db_path.display(),
        schema_version,
        "summary database ready"
    );

    let report = InitOutput {
        config: config_path.display().to_string(),
        database: db_path.display().to_string(),
        schema_version,
        config_written: !existing,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "init config={} database={} schema_version={}",
                r.config, r.database, r.schema_version
            )
        },
        |r, w| {
            writeln!(w, "✓ Initialized {STATE_DIR}/")?;
            writeln!(w)?;
            pretty_kv(w, "Config", &r.config)?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Schema version", r.schema_version.to_string())?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  bugsum rebuild --tasks snapshot.json   # seed counts from task images")?;
            writeln!(w, "  bugsum rollup --until-empty")
        },
    )
}
