//! Error types for es-reindex.

use thiserror::Error;

/// Result type alias for reindex operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scrolling, filtering or bulking documents.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP failure (connection refused, timeout, reset...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a body that is not the expected JSON.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The store answered with a non-empty `error` field.
    #[error("Remote error during {stage}: {message}")]
    Remote {
        /// Stage that issued the request (`scan`, `scroll_next`, `bulk`...).
        stage: &'static str,
        /// Error text reported by the store.
        message: String,
    },

    /// The filter subprocess could not be spawned or talked to.
    #[error("Filter process error: {0}")]
    Filter(String),

    /// The filter produced a line that is not a valid document.
    #[error("Malformed filter output: {0}")]
    MalformedRecord(String),

    /// The filter retry policy gave up on a record.
    #[error("Filter gave up on {identity} after {attempts} attempts: {last_error}")]
    FilterExhausted {
        /// Identity key of the record being transformed.
        identity: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last error seen.
        last_error: String,
    },

    /// A pipeline task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Builds a remote protocol error for the given stage.
    pub fn remote(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            stage,
            message: message.into(),
        }
    }
}
