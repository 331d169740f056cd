/// Application configuration file
/// Stores per-site defaults in ~/.config/ganeti-backup/config.toml
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::Compression;

/// Values read from the config file. Every field is optional, CLI flags win.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub backup_user_server: Option<String>,
    pub backup_folder: Option<String>,
    pub retention_period: Option<u32>,
    pub lv_backup_extension: Option<String>,
    pub backup_extension: Option<String>,
    pub compression: Option<Compression>,
    pub snapshot_size: Option<String>,
    pub block_size: Option<String>,
    pub ssh_options: Option<Vec<String>>,
    pub parallel_nodes: Option<usize>,
    /// Per-command timeout, humantime format ("2h", "30m")
    pub command_timeout: Option<String>,
}

impl AppConfig {
    /// Get default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("ganeti-backup");
        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. The default path is optional and a
    /// missing file yields the empty configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!("config file not found at {}", path.display()));
                }
                Self::load_from(path)
            }
            None => {
                let path = Self::config_path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                Self::load_from(&path)
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Parsed command timeout, if any
    pub fn command_timeout(&self) -> Result<Option<std::time::Duration>> {
        self.command_timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw)
                    .with_context(|| format!("Invalid command_timeout: {}", raw))
            })
            .transpose()
    }
}
