//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retention::{
    DEFAULT_INITIAL_DELAY, DEFAULT_PERIOD, DEFAULT_RETENTION_WINDOW, RetentionPolicy,
};
use crate::storage::db::StorageLocation;

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default storage location.
pub const DEFAULT_LOCATION: &str = "./datalogger/datalogger.db";

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_window() -> Duration {
    DEFAULT_RETENTION_WINDOW
}

fn default_initial_delay() -> Duration {
    DEFAULT_INITIAL_DELAY
}

fn default_period() -> Duration {
    DEFAULT_PERIOD
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Storage location: a file path, `:memory:`, or `duckdb://<path>`.
    /// `${VAR}` and `${VAR:-default}` are expanded from the environment.
    #[serde(default = "default_location")]
    pub location: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
        }
    }
}

impl DatabaseConfig {
    /// Location with environment references expanded.
    pub fn resolved_location(&self) -> String {
        expand_env_vars(&self.location)
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

/// Retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum age of kept records (default: 14d, `0s` disables retention).
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Delay before the first retention cycle (default: 10s).
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Period between retention cycles (default: 24h).
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_RETENTION_WINDOW,
            initial_delay: DEFAULT_INITIAL_DELAY,
            period: DEFAULT_PERIOD,
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.window)
            .with_initial_delay(self.initial_delay)
            .with_period(self.period)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retention configuration.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let location = self.database.resolved_location();
        StorageLocation::parse(&location).map_err(|e| {
            ConfigError::ValidationError(format!("database location '{location}': {e}"))
        })?;

        // A zero window disables retention, so the period only matters otherwise.
        if !self.retention.window.is_zero() && self.retention.period.is_zero() {
            return Err(ConfigError::ValidationError(
                "retention period must be non-zero when retention is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
