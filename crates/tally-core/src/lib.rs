//! # tally-core
//!
//! Shared foundation for tally: the usage/pricing data model, the pure cost
//! formula, and logging initialization. Higher layers (ingest, pricing,
//! store) depend on this crate and nothing here depends on them.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CoreError, Result};
pub use logging::{init_logging, init_test_logging, LogGuard};
pub use types::{
    compute_token_cost, CatalogSnapshot, CostMode, ModelPrice, PriceTable, Provenance,
    TokenCounts, UsageRecord,
};
