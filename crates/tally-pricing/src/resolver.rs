//! Cost resolution for usage records.

use std::sync::Arc;

use tracing::debug;

use tally_core::{compute_token_cost, CostMode, UsageRecord};

use crate::catalog::PricingCatalog;
use crate::coordinator::UnknownModelCoordinator;
use crate::fetcher::PriceFetcher;

/// Computes a record's cost under a selectable policy.
///
/// Catalog misses yield a zero-cost placeholder and escalate the model to
/// the coordinator in the background; the caller never waits on network I/O.
pub struct CostResolver {
    catalog: Arc<PricingCatalog>,
    coordinator: Arc<UnknownModelCoordinator>,
    fetcher: Arc<dyn PriceFetcher>,
}

impl CostResolver {
    pub fn new(
        catalog: Arc<PricingCatalog>,
        coordinator: Arc<UnknownModelCoordinator>,
        fetcher: Arc<dyn PriceFetcher>,
    ) -> Self {
        Self {
            catalog,
            coordinator,
            fetcher,
        }
    }

    /// Resolve the record's cost in USD under `mode`.
    pub fn resolve(&self, record: &UsageRecord, mode: CostMode) -> f64 {
        match mode {
            CostMode::Display => record.precalculated_cost.unwrap_or(0.0),
            CostMode::Calculate => self.derive(record),
            CostMode::Auto => record
                .precalculated_cost
                .unwrap_or_else(|| self.derive(record)),
        }
    }

    fn derive(&self, record: &UsageRecord) -> f64 {
        match self.catalog.price_for(&record.model) {
            Some(price) => compute_token_cost(&record.tokens, &price),
            None => {
                debug!(model = %record.model, "model missing from catalog, cost deferred");
                self.escalate(&record.model);
                0.0
            }
        }
    }

    /// Fire-and-forget escalation of an unpriced model. Must never be
    /// awaited by cost computation.
    fn escalate(&self, model: &str) {
        let coordinator = Arc::clone(&self.coordinator);
        let fetcher = Arc::clone(&self.fetcher);
        let model = model.to_string();
        tokio::spawn(async move {
            coordinator.request_pricing(&model, fetcher).await;
        });
    }
}
