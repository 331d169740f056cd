/// Run configuration
///
/// Builds the immutable `RunContext` for one invocation. Defaults, the config
/// file and CLI flags are layered into a `RunContextBuilder`, and `build()` is
/// the only place values are validated.
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::utils::{
    is_valid_login, AppConfig, DEFAULT_BACKUP_EXTENSION, DEFAULT_BACKUP_FOLDER, DEFAULT_BLOCK_SIZE,
    DEFAULT_COMPRESSION_EGRESS, DEFAULT_COMPRESSION_INGRESS, DEFAULT_LV_BACKUP_EXTENSION,
    DEFAULT_PARALLEL_NODES, DEFAULT_RETENTION_DAYS, DEFAULT_SNAPSHOT_SIZE, DEFAULT_SSH_OPTIONS,
    DEFAULT_UNIQUE_ID_FORMAT, NAME_SEPARATOR,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backup_user_server is not set")]
    MissingLogin,
    #[error("{0:?} is incorrect, expected login@server")]
    InvalidLogin(String),
    #[error("retention_period must be a positive number of days")]
    InvalidRetention,
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must not contain '{separator}': {value:?}")]
    ContainsSeparator {
        field: &'static str,
        separator: char,
        value: String,
    },
    #[error("{field} must not contain whitespace: {value:?}")]
    ContainsWhitespace { field: &'static str, value: String },
    #[error("compression egress must start and end with a pipe, got {0:?}")]
    EgressWithoutPipes(String),
    #[error("parallel_nodes must be at least 1")]
    InvalidParallelism,
    #[error("{field} may only contain letters, digits, '_' and '-': {value:?}")]
    InvalidExtension { field: &'static str, value: String },
}

/// Shell fragments wrapping the transfer stream.
///
/// `egress` runs on the node between `dd` and `ssh`, pipes included.
/// `ingress` runs on the repository host and is followed by the artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    pub egress: String,
    pub ingress: String,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            egress: DEFAULT_COMPRESSION_EGRESS.to_string(),
            ingress: DEFAULT_COMPRESSION_INGRESS.to_string(),
        }
    }
}

/// `login@host` of the backup repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLogin {
    pub user: String,
    pub host: String,
}

impl FromStr for RepositoryLogin {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_valid_login(s) {
            return Err(ConfigError::InvalidLogin(s.to_string()));
        }

        let (user, host) = s
            .split_once('@')
            .ok_or_else(|| ConfigError::InvalidLogin(s.to_string()))?;

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
        })
    }
}

impl fmt::Display for RepositoryLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Immutable configuration of one backup run
#[derive(Debug, Clone)]
pub struct RunContext {
    unique_id: String,
    retention_days: u32,
    login: RepositoryLogin,
    backup_folder: String,
    lv_backup_extension: String,
    backup_extension: String,
    compression: Compression,
    debug: bool,
    instance_names: Option<Vec<String>>,
    snapshot_size: String,
    block_size: String,
    ssh_options: Vec<String>,
    parallel_nodes: usize,
    command_timeout: Option<Duration>,
}

impl RunContext {
    pub fn builder() -> RunContextBuilder {
        RunContextBuilder::default()
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn login(&self) -> &RepositoryLogin {
        &self.login
    }

    pub fn backup_folder(&self) -> &str {
        &self.backup_folder
    }

    pub fn lv_backup_extension(&self) -> &str {
        &self.lv_backup_extension
    }

    pub fn backup_extension(&self) -> &str {
        &self.backup_extension
    }

    pub fn compression(&self) -> &Compression {
        &self.compression
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn instance_names(&self) -> Option<&[String]> {
        self.instance_names.as_deref()
    }

    pub fn snapshot_size(&self) -> &str {
        &self.snapshot_size
    }

    pub fn block_size(&self) -> &str {
        &self.block_size
    }

    pub fn ssh_options(&self) -> &[String] {
        &self.ssh_options
    }

    pub fn parallel_nodes(&self) -> usize {
        self.parallel_nodes
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Full repository path of an artifact file
    pub fn artifact_path(&self, artifact: &str) -> String {
        format!("{}{}", self.backup_folder, artifact)
    }
}

/// Collects configuration layers, validates once in `build()`
#[derive(Debug, Clone, Default)]
pub struct RunContextBuilder {
    unique_id: Option<String>,
    retention_days: Option<u32>,
    login: Option<String>,
    backup_folder: Option<String>,
    lv_backup_extension: Option<String>,
    backup_extension: Option<String>,
    compression: Option<Compression>,
    debug: bool,
    instance_names: Option<Vec<String>>,
    snapshot_size: Option<String>,
    block_size: Option<String>,
    ssh_options: Option<Vec<String>>,
    parallel_nodes: Option<usize>,
    command_timeout: Option<Duration>,
}

impl RunContextBuilder {
    pub fn unique_id(mut self, value: impl Into<String>) -> Self {
        self.unique_id = Some(value.into());
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn login(mut self, value: impl Into<String>) -> Self {
        self.login = Some(value.into());
        self
    }

    pub fn backup_folder(mut self, value: impl Into<String>) -> Self {
        self.backup_folder = Some(value.into());
        self
    }

    pub fn lv_backup_extension(mut self, value: impl Into<String>) -> Self {
        self.lv_backup_extension = Some(value.into());
        self
    }

    pub fn backup_extension(mut self, value: impl Into<String>) -> Self {
        self.backup_extension = Some(value.into());
        self
    }

    pub fn compression(mut self, value: Compression) -> Self {
        self.compression = Some(value);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn instance_names(mut self, names: Vec<String>) -> Self {
        self.instance_names = Some(names);
        self
    }

    pub fn snapshot_size(mut self, value: impl Into<String>) -> Self {
        self.snapshot_size = Some(value.into());
        self
    }

    pub fn block_size(mut self, value: impl Into<String>) -> Self {
        self.block_size = Some(value.into());
        self
    }

    pub fn ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = Some(options);
        self
    }

    pub fn parallel_nodes(mut self, count: usize) -> Self {
        self.parallel_nodes = Some(count);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Layer values from the config file. Fields already set are kept, so
    /// apply the file before CLI flags.
    pub fn with_file(mut self, file: &AppConfig, command_timeout: Option<Duration>) -> Self {
        fn keep<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }

        keep(&mut self.login, &file.backup_user_server);
        keep(&mut self.backup_folder, &file.backup_folder);
        keep(&mut self.retention_days, &file.retention_period);
        keep(&mut self.lv_backup_extension, &file.lv_backup_extension);
        keep(&mut self.backup_extension, &file.backup_extension);
        keep(&mut self.compression, &file.compression);
        keep(&mut self.snapshot_size, &file.snapshot_size);
        keep(&mut self.block_size, &file.block_size);
        keep(&mut self.ssh_options, &file.ssh_options);
        keep(&mut self.parallel_nodes, &file.parallel_nodes);
        keep(&mut self.command_timeout, &command_timeout);
        self
    }

    /// Fill defaults and validate
    pub fn build(self) -> Result<RunContext, ConfigError> {
        let unique_id = self
            .unique_id
            .unwrap_or_else(|| Local::now().format(DEFAULT_UNIQUE_ID_FORMAT).to_string());
        let login = self
            .login
            .ok_or(ConfigError::MissingLogin)?
            .parse::<RepositoryLogin>()?;
        let retention_days = self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        let backup_folder = self
            .backup_folder
            .unwrap_or_else(|| DEFAULT_BACKUP_FOLDER.to_string());
        let lv_backup_extension = self
            .lv_backup_extension
            .unwrap_or_else(|| DEFAULT_LV_BACKUP_EXTENSION.to_string());
        let backup_extension = self
            .backup_extension
            .unwrap_or_else(|| DEFAULT_BACKUP_EXTENSION.to_string());
        let compression = self.compression.unwrap_or_default();
        let snapshot_size = self
            .snapshot_size
            .unwrap_or_else(|| DEFAULT_SNAPSHOT_SIZE.to_string());
        let block_size = self
            .block_size
            .unwrap_or_else(|| DEFAULT_BLOCK_SIZE.to_string());
        let ssh_options = self
            .ssh_options
            .unwrap_or_else(|| DEFAULT_SSH_OPTIONS.iter().map(|s| s.to_string()).collect());
        let parallel_nodes = self.parallel_nodes.unwrap_or(DEFAULT_PARALLEL_NODES);

        if retention_days == 0 {
            return Err(ConfigError::InvalidRetention);
        }
        if parallel_nodes == 0 {
            return Err(ConfigError::InvalidParallelism);
        }

        for (field, value) in [
            ("unique_id", &unique_id),
            ("lv_backup_extension", &lv_backup_extension),
            ("backup_extension", &backup_extension),
        ] {
            require_non_empty(field, value)?;
            require_single_word(field, value)?;
            if value.contains(NAME_SEPARATOR) {
                return Err(ConfigError::ContainsSeparator {
                    field,
                    separator: NAME_SEPARATOR,
                    value: value.clone(),
                });
            }
        }

        for (field, value) in [
            ("lv_backup_extension", &lv_backup_extension),
            ("backup_extension", &backup_extension),
        ] {
            if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(ConfigError::InvalidExtension {
                    field,
                    value: value.clone(),
                });
            }
        }

        require_non_empty("backup_folder", &backup_folder)?;
        let backup_folder = if backup_folder.ends_with('/') {
            backup_folder
        } else {
            format!("{}/", backup_folder)
        };
        require_non_empty("compression.egress", &compression.egress)?;
        require_non_empty("compression.ingress", &compression.ingress)?;
        for (field, value) in [("snapshot_size", &snapshot_size), ("block_size", &block_size)] {
            require_non_empty(field, value)?;
            require_single_word(field, value)?;
        }

        let egress = compression.egress.trim();
        if egress.len() < 2 || !egress.starts_with('|') || !egress.ends_with('|') {
            return Err(ConfigError::EgressWithoutPipes(compression.egress.clone()));
        }

        Ok(RunContext {
            unique_id,
            retention_days,
            login,
            backup_folder,
            lv_backup_extension,
            backup_extension,
            compression,
            debug: self.debug,
            instance_names: self.instance_names.filter(|names| !names.is_empty()),
            snapshot_size,
            block_size,
            ssh_options,
            parallel_nodes,
            command_timeout: self.command_timeout,
        })
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty { field });
    }
    Ok(())
}

fn require_single_word(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.chars().any(char::is_whitespace) {
        return Err(ConfigError::ContainsWhitespace {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
