//! Tracing subscriber installation for the binary.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Subscriber installation failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log level '{level}': {message}\n  Suggestion: Use a level like 'info' or a directive like 'history_refresh=debug'")]
    InvalidLevel {
        /// The rejected directive.
        level: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Builds the filter: `RUST_LOG` when set, otherwise `default_level`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidLevel`] if `default_level` does not parse.
pub fn env_filter(default_level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_level).map_err(|e| TelemetryError::InvalidLevel {
        level: default_level.to_string(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber writing to stderr in `format`.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the level is invalid or a subscriber is
/// already installed.
pub fn init_tracing(default_level: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = env_filter(default_level)?;
    let installed = match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    installed.map_err(|e| TelemetryError::Install(e.to_string()))
}
