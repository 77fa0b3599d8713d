//! Error types for the storage layer.

use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization error for the pricing snapshot payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// Query error
    #[error("query error: {0}")]
    Query(String),
}

impl StoreError {
    /// Check if this error indicates a database lock (retryable).
    pub fn is_database_locked(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
            }
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
