//! # tally-pricing
//!
//! The pricing subsystem: a tiered catalog (network > disk cache > bundled),
//! a single-flight coordinator that keeps at most one pricing fetch in
//! flight regardless of how many cost computations hit unknown models, a
//! policy-driven cost resolver, and a refresh scheduler that adapts its
//! interval to pending lookups.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_pricing::{
//!     catalog::{PricingCatalog, DEFAULT_TTL},
//!     coordinator::{UnknownModelCoordinator, DEFAULT_COOLDOWN},
//!     fetcher::LiteLlmFetcher,
//!     resolver::CostResolver,
//! };
//! use tally_store::SqliteStore;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store: Arc<SqliteStore> = Arc::new(SqliteStore::open("~/.tally/tally.db")?);
//! let catalog = Arc::new(PricingCatalog::bootstrap(store.as_ref(), DEFAULT_TTL));
//! let coordinator = Arc::new(UnknownModelCoordinator::new(
//!     Arc::clone(&catalog),
//!     store,
//!     DEFAULT_COOLDOWN,
//! ));
//! let fetcher = Arc::new(LiteLlmFetcher::new()?);
//! let resolver = CostResolver::new(catalog, coordinator, fetcher);
//! # Ok(())
//! # }
//! ```

pub mod bundled;
pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod resolver;
pub mod scheduler;

pub use catalog::PricingCatalog;
pub use coordinator::{FetchOutcome, UnknownModelCoordinator};
pub use error::{PricingError, Result};
pub use fetcher::{LiteLlmFetcher, PriceFetcher};
pub use resolver::CostResolver;
pub use scheduler::{RefreshScheduler, SchedulerConfig};
