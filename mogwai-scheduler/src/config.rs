//! Daemon configuration
//!
//! TOML-based configuration with environment variable overrides.
//! Loading hierarchy: environment > file > defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::{SchedulerOptions, DEFAULT_MAX_ACTIVE_ENTRIES, DEFAULT_MAX_ENTRIES};

/// Config file consulted when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mogwai/scheduled.toml";

/// Default daemon inactivity timeout, in seconds
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 30;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the config file failed
    #[error("Config I/O error: {0}")]
    Io(String),
    /// The config file is not valid TOML for this schema
    #[error("Config parse error: {0}")]
    Parse(String),
    /// The configuration is structurally valid but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Cap on the total number of entries
    pub max_entries: usize,
    /// Cap on simultaneously active entries
    pub max_active_entries: usize,
    /// Seconds of idleness before the daemon exits; 0 disables the timeout
    pub inactivity_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_active_entries: DEFAULT_MAX_ACTIVE_ENTRIES,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    /// Scheduler options corresponding to this config
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_entries: self.max_entries,
            max_active_entries: self.max_active_entries,
            ..Default::default()
        }
    }
}

/// Load configuration from a file (or the default path, if present) and
/// apply environment overrides
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_from_file(&default)?
            } else {
                ServiceConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a specific file
pub fn load_from_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| ConfigError::Io(format!("{}: {}", path.display(), err)))?;
    toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
}

/// Apply `MOGWAI_`-prefixed environment variable overrides
pub fn apply_env_overrides(config: &mut ServiceConfig) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var("MOGWAI_MAX_ENTRIES") {
        config.max_entries = parse_env("MOGWAI_MAX_ENTRIES", &value)?;
    }
    if let Ok(value) = std::env::var("MOGWAI_MAX_ACTIVE_ENTRIES") {
        config.max_active_entries = parse_env("MOGWAI_MAX_ACTIVE_ENTRIES", &value)?;
    }
    if let Ok(value) = std::env::var("MOGWAI_INACTIVITY_TIMEOUT_SECS") {
        config.inactivity_timeout_secs = parse_env("MOGWAI_INACTIVITY_TIMEOUT_SECS", &value)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("{}={:?} is not a valid value", key, value)))
}

fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.max_entries == 0 {
        return Err(ConfigError::Invalid(
            "max_entries must be at least 1".to_string(),
        ));
    }
    if config.max_active_entries == 0 {
        return Err(ConfigError::Invalid(
            "max_active_entries must be at least 1".to_string(),
        ));
    }
    Ok(())
}
