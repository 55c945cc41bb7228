//! Run configuration.
//!
//! Loaded from TOML; every field is optional and falls back to the defaults
//! used for telescope runs.
//!
//! ```toml
//! [sync]
//! threshold = 2
//! report_limit = 20
//!
//! [reader]
//! poll_interval_ms = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Policy of the cross-board synchronization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Minimum pivot difference that flags a board as desynchronized
    pub threshold: u32,
    /// Desynchronized records reported in detail before going quiet
    pub report_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            report_limit: 20,
        }
    }
}

/// Settings of the sequential record reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Polling interval while following a file that is still being written
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub sync: SyncConfig,
    pub reader: ReaderConfig,
}

impl RunConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.reader.poll_interval_ms)
    }

    pub fn to_toml(&self) -> String {
        // plain structs of integers always serialize
        toml::to_string_pretty(self).unwrap_or_default()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.sync.threshold == 0 {
            return Err(ConfigError::Invalid(
                "sync.threshold must be at least 1".to_string(),
            ));
        }
        if self.reader.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reader.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

impl FromStr for RunConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str::<RunConfig>(s)?.validate()
    }
}
