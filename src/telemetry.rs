//! # Telemetry
//!
//! `tracing` subscriber bootstrap.
//!
//! `RUST_LOG` takes precedence over the configured level when set.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `ship_quote=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Subscriber setup failure.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive does not parse.
    #[error("invalid log filter {directive:?}: {message}")]
    InvalidFilter {
        /// The rejected directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber is already installed.
    #[error("tracing already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Builds the filter from `RUST_LOG`, falling back to the configured level.
fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::AlreadyInitialized` if called twice, or
/// `InvalidFilter` for an unparsable level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config)?)
        .with_target(true);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_lowercase() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn second_init_is_an_error() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(matches!(
            init_tracing(&config),
            Err(TelemetryError::AlreadyInitialized(_))
        ));
    }
}
