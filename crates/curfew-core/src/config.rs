use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::limits::ALARM_TICK_SECS;

pub const CONFIG_FILE: &str = "config.toml";
pub const SOCKET_FILE: &str = "curfew.sock";
pub const PID_FILE: &str = "curfew.pid";
pub const LOG_FILE: &str = "curfew.log";

/// Get the local data directory for curfew.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("curfew");
    Ok(path)
}

/// Daemon plumbing settings from `config.toml`.
///
/// Budget, curfew and tracked domains are fixed and have no entry here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurfewConfig {
    /// SQLite file; defaults to `curfew.db` in the data dir
    pub database_path: Option<PathBuf>,
    /// IPC socket; defaults to `curfew.sock` in the data dir
    pub socket_path: Option<PathBuf>,
    pub alarm_interval_seconds: u64,
}

impl Default for CurfewConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            socket_path: None,
            alarm_interval_seconds: ALARM_TICK_SECS,
        }
    }
}

impl CurfewConfig {
    /// Load `config.toml` from `data_dir`, or defaults if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if config.alarm_interval_seconds == 0 {
            anyhow::bail!("alarm_interval_seconds must be at least 1");
        }
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    #[must_use]
    pub fn socket_path(&self, data_dir: &Path) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| data_dir.join(SOCKET_FILE))
    }

    /// Explicit database path, if configured. `None` selects the storage
    /// crate's default location.
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.clone()
    }
}
