//! Error types for the medrem_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medrem_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A scheduling or lifecycle input was out of range
    /// (non-positive frequency, negative duration, empty name, bad month).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A medicine (or other record) could not be located
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand used by the scheduler and lifecycle validation
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }
}
