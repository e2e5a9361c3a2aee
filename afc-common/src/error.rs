//! Common error types for the AFC engine

use thiserror::Error;

/// Common result type for AFC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store and the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing required field or malformed payload; nothing was written
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced lead or task does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent transaction could not be completed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention, the only error the store retries
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            Error::Conflict(_) => true,
            _ => false,
        }
    }
}
