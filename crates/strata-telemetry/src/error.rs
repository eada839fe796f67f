//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from building or installing the log subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A log format name that is not one of pretty, compact, json or full.
    #[error("unknown log format: {0}")]
    UnknownFormat(String),

    /// The level or a directive does not parse as an `EnvFilter`.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    /// The rolling-file directory could not be created.
    #[error("cannot create log directory {}: {source}", path.display())]
    LogDirectory {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
