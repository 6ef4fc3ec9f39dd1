//! Configuration loading using Figment.
//!
//! This module provides strongly-typed configuration for the framework.
//! Configuration is loaded from:
//! 1. A TOML file (base configuration, `config/hil.toml` by default)
//! 2. Environment variables (prefixed with RUSTHIL_)
//!
//! # Environment Variable Overrides
//!
//! Environment variables with the `RUSTHIL_` prefix can override configuration values:
//!
//! ```text
//! RUSTHIL_LOGGING_LEVEL=debug
//! RUSTHIL_SSH_HOST=fuchsia-5254-0063-5e7a.local
//! RUSTHIL_SSH_PORT=8022
//! ```
//!
//! Variable names are split on underscores to address nested fields, so only
//! single-word fields (`host`, `port`, `user`, `level`, `json`) are reachable
//! this way; multi-word fields like `identity_file` come from the TOML file.
//!
//! # Example
//!
//! ```no_run
//! use rust_hil::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Log level: {}", settings.logging.level);
//!     println!("SSH target: {}", settings.ssh.destination());
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, HilError};
use crate::job::{DEFAULT_RETENTION_LIMIT, DEFAULT_STOP_GRACE};
use crate::ssh::SshSettings;

/// Top-level framework configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Job execution settings
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// SSH transport settings for the default target
    #[serde(default)]
    pub ssh: SshSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Job execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Default wall-clock limit applied to jobs that do not set their own
    #[serde(default, with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
    /// Bytes of stdout/stderr retained per stream per job
    #[serde(default = "default_retention_limit")]
    pub retention_limit: usize,
    /// Grace period between SIGTERM and SIGKILL when stopping a job
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_retention_limit() -> usize {
    DEFAULT_RETENTION_LIMIT
}

fn default_stop_grace() -> Duration {
    DEFAULT_STOP_GRACE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout: None,
            retention_limit: default_retention_limit(),
            stop_grace: default_stop_grace(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            execution: ExecutionSettings::default(),
            ssh: SshSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `config/hil.toml` and environment variables
    ///
    /// Configuration is loaded in this order of precedence (highest to lowest):
    /// 1. Environment variables (RUSTHIL_ prefix)
    /// 2. config/hil.toml file
    ///
    /// After loading, configuration is validated.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/hil.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; the defaults plus environment
    /// overrides apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUSTHIL_").split("_"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Retention limit is non-zero
    /// - Stop grace is non-zero
    /// - SSH settings are coherent when a host is configured
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(HilError::Configuration(format!(
                "Invalid logging level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.execution.retention_limit == 0 {
            return Err(HilError::Configuration(
                "retention_limit must be greater than zero".to_string(),
            ));
        }

        if self.execution.stop_grace.is_zero() {
            return Err(HilError::Configuration(
                "stop_grace must be greater than zero".to_string(),
            ));
        }

        // An unset SSH host just means this run only drives local jobs.
        if !self.ssh.host.is_empty() {
            self.ssh.validate()?;
        }

        Ok(())
    }
}
