pub mod count;
pub mod init;
pub mod rollup;
pub mod status;
pub mod verify;

use std::path::Path;

use anyhow::{Context as _, Result};
use bugsum_core::config::{self, SummaryConfig};
use bugsum_core::db;
use bugsum_core::error::ErrorCode;
use bugsum_core::model::BugTaskFlat;
use rusqlite::Connection;

use crate::output::{CliError, OutputMode, fail};

/// Load the project config, reporting parse failures as `E1002`.
pub fn load_config(project_root: &Path, output: OutputMode) -> Result<SummaryConfig> {
    config::load_config(project_root).map_err(|err| {
        fail(
            output,
            CliError::with_code(ErrorCode::ConfigParseError, format!("{err:#}")),
        )
    })
}

/// Open the configured summary database, which must already exist.
pub fn open_summary(project_root: &Path, output: OutputMode) -> Result<(SummaryConfig, Connection)> {
    let config = load_config(project_root, output)?;
    let db_path = config.db_path(project_root);
    match db::try_open_existing(&db_path)? {
        Some(conn) => Ok((config, conn)),
        None => Err(fail(
            output,
            CliError::with_code(
                ErrorCode::NotInitialized,
                format!("summary database not found at {}", db_path.display()),
            ),
        )),
    }
}

/// Read a snapshot of bug task images: a JSON array of task objects.
pub fn read_tasks(path: &Path) -> Result<Vec<BugTaskFlat>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task snapshot {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse task snapshot {}", path.display()))
}
