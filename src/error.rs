//! Error types for the hit store.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the memstore and its storage collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hit references a site that doesn't exist
    #[error("Site not found: {0}")]
    SiteNotFound(i64),

    /// A hit failed business validation
    #[error("Validation error: {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Cache payload couldn't be encoded or decoded
    #[error("Cache error: {0}")]
    Cache(String),

    /// Storage backend refused the operation
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
