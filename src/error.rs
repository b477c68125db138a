//! Error types for mftfind
//!
//! Configuration and Yara compile failures stop a run before any record is
//! visited. Everything raised while evaluating a single record is recoverable
//! and ends up in the run statistics instead.

use thiserror::Error;

/// Main error type for search operations
#[derive(Error, Debug)]
pub enum FindError {
    #[error("Invalid search term: {0}")]
    Configuration(String),

    #[error("Failed to read {stream}: {source}")]
    Stream {
        stream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compile yara rules: {0}")]
    YaraCompile(String),

    #[error("Yara scan failed: {0}")]
    YaraScan(String),

    #[error("Record cache is scoped to {scoped}, queried for {requested}")]
    CacheInvariantViolation { scoped: String, requested: String },

    #[error("Failed to walk location '{0}': {1}")]
    Walk(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for search operations
pub type Result<T> = std::result::Result<T, FindError>;

impl FindError {
    pub fn configuration(message: impl Into<String>) -> Self {
        FindError::Configuration(message.into())
    }

    pub fn stream(stream: impl Into<String>, source: std::io::Error) -> Self {
        FindError::Stream {
            stream: stream.into(),
            source,
        }
    }

    /// Check if this error is recoverable (the walk can continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FindError::Stream { .. }
                | FindError::YaraScan(_)
                | FindError::CacheInvariantViolation { .. }
                | FindError::Io(_)
        )
    }
}
