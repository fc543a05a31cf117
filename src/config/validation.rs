//! Configuration errors and value helpers.

use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a human-readable duration (`30s`, `12h`, `14d`, `1h 30m`).
///
/// `0s` is accepted and means "disabled" where a setting allows it.
///
/// # Examples
///
/// ```
/// use datalogger::config::parse_duration;
///
/// assert_eq!(parse_duration("14d").unwrap().as_secs(), 14 * 86_400);
/// assert!(parse_duration("0s").unwrap().is_zero());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::ValidationError(
            "duration string is empty".to_string(),
        ));
    }
    humantime::parse_duration(s)
        .map_err(|e| ConfigError::ValidationError(format!("invalid duration '{s}': {e}")))
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is a valid regex")
    });

    regex
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1])
                .unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}
