//! Configuration module for the data logger.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (storage location)
//! - Retention settings (window, initial delay, period)

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, RetentionConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::DEFAULT_LOCATION;
