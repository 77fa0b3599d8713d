//! Error types shared by tally's foundation layer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while setting up tally's runtime environment.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Log or data directory could not be created
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Home directory could not be resolved
    #[error("HOME environment variable not set")]
    HomeNotSet,

    /// Internal invariant violated
    #[error("Internal error: {message}")]
    Internal { message: String },
}
