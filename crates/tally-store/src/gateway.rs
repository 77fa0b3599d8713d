//! The narrow persistence contract the ingestion and pricing cores depend on.
//!
//! Everything above this trait is storage-engine-agnostic: the core hands
//! batches of records to `upsert`, asks for range aggregations, and
//! round-trips the pricing catalog snapshot. [`crate::SqliteStore`] is the
//! production implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{CatalogSnapshot, UsageRecord};

use crate::error::Result;

/// Outcome of one batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Rows newly inserted
    pub inserted: usize,
    /// Rows overwritten in place (identity hash already present)
    pub updated: usize,
}

impl UpsertStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Aggregated spend for one model over a queried range.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpend {
    pub model: String,
    pub total_cost_usd: f64,
    pub record_count: i64,
}

/// Idempotent storage and range-aggregation contract.
///
/// `upsert` must be idempotent by identity hash: a record whose hash already
/// exists overwrites the stored row rather than inserting a duplicate, and
/// unhashable records (no identity hash) always insert. Each batch is one
/// all-or-nothing transaction.
pub trait PersistenceGateway: Send + Sync {
    /// Insert or overwrite a batch of records in a single transaction.
    fn upsert(&self, records: &[UsageRecord]) -> Result<UpsertStats>;

    /// Sum of resolved costs in `[start, end)`.
    fn cost_sum(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64>;

    /// Resolved cost grouped by model in `[start, end)`, highest spend first.
    fn cost_by_model(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<ModelSpend>>;

    /// All records in `[start, end)`, oldest first.
    fn records_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>>;

    /// Overwrite resolved costs by row id in a single transaction.
    fn backfill_costs(&self, updates: &[(i64, f64)]) -> Result<usize>;

    /// Load the persisted pricing catalog snapshot, if any.
    fn load_cached_pricing(&self) -> Result<Option<CatalogSnapshot>>;

    /// Persist the pricing catalog snapshot, replacing any previous one.
    fn save_pricing(&self, snapshot: &CatalogSnapshot) -> Result<()>;
}
