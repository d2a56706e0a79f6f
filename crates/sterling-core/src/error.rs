//! Error types for the sterling pipeline.

use thiserror::Error;

use crate::models::IntegrityReason;

/// Result type alias using sterling's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sterling operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Pipeline job not found
    #[error("Pipeline job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Document insight not found
    #[error("Insight not found: {0}")]
    InsightNotFound(uuid::Uuid),

    /// Document could not be classified into a supported catalogue key
    #[error("Classification error: {0}")]
    Classification(String),

    /// A cross-check invariant failed during normalization. Carries the
    /// reason and signed delta so the dead-letter row can record both.
    #[error("Integrity failure: {reason}")]
    Integrity {
        reason: IntegrityReason,
        delta: Option<f64>,
    },

    /// Standardization service returned an error
    #[error("Standardization error: {0}")]
    Docupipe(String),

    /// Standardization polling exhausted its deadline
    #[error("Standardization timeout: {0}")]
    DocupipeTimeout(String),

    /// An array-update plan mixed conflicting operators on one path
    #[error("Conflicting update: {0}")]
    ConflictingUpdate(String),

    /// Object storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
