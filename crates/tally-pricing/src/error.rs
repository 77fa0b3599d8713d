//! Error types for the pricing subsystem.

use thiserror::Error;

/// Pricing errors.
///
/// Every variant is recoverable: fetch failures degrade to an older catalog
/// tier, and unknown models resolve to zero-cost placeholders.
#[derive(Error, Debug)]
pub enum PricingError {
    /// HTTP transport error
    #[error("pricing fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from the pricing endpoint
    #[error("pricing endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// Response body exceeded the size guard
    #[error("pricing response too large: {bytes} bytes")]
    TooLarge { bytes: u64 },

    /// Pricing payload could not be decoded
    #[error("pricing decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persistence of the catalog snapshot failed
    #[error("pricing store error: {0}")]
    Store(#[from] tally_store::StoreError),
}

/// Result type for pricing operations.
pub type Result<T> = std::result::Result<T, PricingError>;
