//! Error types for the ingestion layer.

use thiserror::Error;

/// Ingestion errors.
///
/// Per-line parse failures are not errors at this level; they are counted in
/// [`crate::parser::FileStats`] and never cross the file boundary.
#[derive(Error, Debug)]
pub enum IngestError {
    /// File could not be opened or read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Watcher could not be initialized
    #[error("watcher init failed: {message}")]
    WatcherInit { message: String },

    /// Persistence failure during an ingestion cycle
    #[error("store error: {0}")]
    Store(#[from] tally_store::StoreError),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
