use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (relative to the project root) holding config, DB and locks.
pub const STATE_DIR: &str = ".bugsum";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub upsert: UpsertConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database path, relative to the project root unless absolute.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Journal rows per rollup run; `0` drains everything.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long a run waits for the rollup lock; `0` tries once.
    #[serde(default)]
    pub lock_timeout_ms: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lock_timeout_ms: 0,
        }
    }
}

impl RollupConfig {
    #[must_use]
    pub const fn batch_limit(&self) -> Option<usize> {
        if self.batch_size == 0 {
            None
        } else {
            Some(self.batch_size)
        }
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(STATE_DIR).join("summary.db")
}

const fn default_batch_size() -> usize {
    10_000
}

const fn default_max_retries() -> u32 {
    8
}

const fn default_backoff_base_ms() -> u64 {
    2
}

const fn default_backoff_max_ms() -> u64 {
    250
}

impl SummaryConfig {
    /// Absolute database path for a project rooted at `project_root`.
    #[must_use]
    pub fn db_path(&self, project_root: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            project_root.join(&self.database.path)
        }
    }

    /// Lock file serializing rollup runs against the database.
    #[must_use]
    pub fn rollup_lock_path(&self, project_root: &Path) -> PathBuf {
        let db_path = self.db_path(project_root);
        let mut name = db_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".rollup.lock");
        db_path.with_file_name(name)
    }
}

/// Path of the project config file.
#[must_use]
pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("config.toml")
}

/// Load `.bugsum/config.toml`, falling back to defaults when it is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(project_root: &Path) -> Result<SummaryConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(SummaryConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<SummaryConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write `config` to `.bugsum/config.toml`, creating the directory.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_config(project_root: &Path, config: &SummaryConfig) -> Result<PathBuf> {
    let path = config_path(project_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create config directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Load the per-user config from the platform config dir, if any.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("bugsum/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, SummaryConfig::default());
        assert_eq!(config.rollup.batch_limit(), Some(10_000));
        assert_eq!(config.upsert.max_retries, 8);
    }

    #[test]
    fn partial_config_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            config_path(dir.path()),
            "[rollup]\nbatch_size = 0\n\n[upsert]\nmax_retries = 3\n",
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.rollup.batch_limit(), None);
        assert_eq!(config.upsert.max_retries, 3);
        assert_eq!(config.upsert.backoff_max_ms, 250);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(config_path(dir.path()), "[rollup\nbatch_size = ").unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn write_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SummaryConfig::default();
        config.rollup.batch_size = 42;
        write_config(dir.path(), &config).unwrap();
        assert_eq!(load_config(dir.path()).unwrap(), config);
    }

    #[test]
    fn db_and_lock_paths_resolve_against_root() {
        let config = SummaryConfig::default();
        let root = Path::new("/srv/project");
        assert_eq!(
            config.db_path(root),
            PathBuf::from("/srv/project/.bugsum/summary.db")
        );
        assert_eq!(
            config.rollup_lock_path(root),
            PathBuf::from("/srv/project/.bugsum/summary.db.rollup.lock")
        );
    }
}
