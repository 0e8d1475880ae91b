// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::RetrySettings;
use crate::error::{Result, ServicesError};

/// Main configuration structure for the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Operator instance name, also used to name the snapshot record
    pub name: String,

    /// Namespace the supplementary services are deployed into
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory holding the last applied configuration snapshot
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Retry budget for wait and init operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Complete attempts per cluster member when propagating keys
    #[serde(default = "default_tries_count")]
    pub tries_count: u32,

    /// Pause between failed attempts, in seconds
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path (optional)
    pub file: Option<PathBuf>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tries_count: default_tries_count(),
            retry_timeout_secs: default_retry_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "cassandra-services".to_string(),
            namespace: default_namespace(),
            state_dir: default_state_dir(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ServicesError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ServicesError::InvalidConfig {
                message: "Operator name cannot be empty".to_string(),
            });
        }

        if self.namespace.is_empty() {
            return Err(ServicesError::InvalidConfig {
                message: "Namespace cannot be empty".to_string(),
            });
        }

        if self.retry.tries_count == 0 {
            return Err(ServicesError::InvalidConfig {
                message: "retry.tries_count must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Retry settings handed to every reconciliation pass
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            tries_count: self.retry.tries_count,
            retry_timeout: Duration::from_secs(self.retry.retry_timeout_secs),
        }
    }

    /// Path of the last applied configuration snapshot
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir
            .join(format!("{}-last-applied-configuration-info.json", self.name))
    }
}

// Default value functions

fn default_namespace() -> String {
    "cassandra".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_tries_count() -> u32 {
    5
}

fn default_retry_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
