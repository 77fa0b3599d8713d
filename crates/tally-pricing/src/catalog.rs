//! Tiered pricing catalog.
//!
//! Read preference: in-memory table (TTL-bounded), then the persisted disk
//! snapshot, then the bundled static table which never expires. A network
//! fetch overwrites memory and disk and moves provenance to `network`.
//! Provenance is observable but never affects the cost formula.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use tally_core::{CatalogSnapshot, ModelPrice, PriceTable, Provenance};
use tally_store::PersistenceGateway;

use crate::bundled::bundled_table;

/// Default time-to-live for live catalog tiers.
pub const DEFAULT_TTL: Duration = Duration::hours(4);

struct CatalogState {
    prices: PriceTable,
    provenance: Provenance,
    fetched_at: DateTime<Utc>,
}

/// Model price lookup with tiered provenance.
///
/// Constructed once at startup and mutated in place by refreshes; never
/// replaced wholesale.
pub struct PricingCatalog {
    state: RwLock<CatalogState>,
    ttl: Duration,
}

impl PricingCatalog {
    /// Build the catalog from the best available tier: a fresh disk
    /// snapshot if the gateway has one, else the bundled table.
    pub fn bootstrap(gateway: &dyn PersistenceGateway, ttl: Duration) -> Self {
        let now = Utc::now();

        match gateway.load_cached_pricing() {
            Ok(Some(snapshot)) if now.signed_duration_since(snapshot.fetched_at) < ttl => {
                info!(
                    models = snapshot.prices.len(),
                    fetched_at = %snapshot.fetched_at,
                    "pricing catalog loaded from disk cache"
                );
                Self::from_parts(snapshot.prices, Provenance::Cache, snapshot.fetched_at, ttl)
            }
            Ok(Some(snapshot)) => {
                debug!(fetched_at = %snapshot.fetched_at, "disk pricing snapshot expired");
                Self::bundled(ttl, now)
            }
            Ok(None) => Self::bundled(ttl, now),
            Err(e) => {
                warn!(error = %e, "failed to load pricing snapshot, using bundled table");
                Self::bundled(ttl, now)
            }
        }
    }

    /// Build a catalog directly from parts (tests and forced reloads).
    pub fn from_parts(
        prices: PriceTable,
        provenance: Provenance,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            state: RwLock::new(CatalogState {
                prices,
                provenance,
                fetched_at,
            }),
            ttl,
        }
    }

    fn bundled(ttl: Duration, now: DateTime<Utc>) -> Self {
        let table = bundled_table();
        info!(models = table.len(), "pricing catalog using bundled table");
        Self::from_parts(table, Provenance::Bundled, now, ttl)
    }

    /// Price for an exact model name, if known.
    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        self.state
            .read()
            .expect("catalog lock poisoned")
            .prices
            .get(model)
            .copied()
    }

    /// Which tier produced the current table.
    pub fn provenance(&self) -> Provenance {
        self.state.read().expect("catalog lock poisoned").provenance
    }

    /// When the current table was acquired.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.state.read().expect("catalog lock poisoned").fetched_at
    }

    /// Number of models in the current table.
    pub fn len(&self) -> usize {
        self.state.read().expect("catalog lock poisoned").prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the live tier has outlived its TTL. The bundled tier never
    /// expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.read().expect("catalog lock poisoned");
        state.provenance != Provenance::Bundled
            && now.signed_duration_since(state.fetched_at) >= self.ttl
    }

    /// Install a freshly fetched table: overwrite memory, persist to disk,
    /// set provenance to `network`.
    pub fn install_network(
        &self,
        table: PriceTable,
        now: DateTime<Utc>,
        gateway: &dyn PersistenceGateway,
    ) {
        {
            let mut state = self.state.write().expect("catalog lock poisoned");
            state.prices = table;
            state.provenance = Provenance::Network;
            state.fetched_at = now;
        }

        let snapshot = self.snapshot();
        if let Err(e) = gateway.save_pricing(&snapshot) {
            warn!(error = %e, "failed to persist pricing snapshot");
        }

        info!(models = snapshot.prices.len(), "pricing catalog refreshed from network");
    }

    /// Current table as a persistable snapshot.
    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.read().expect("catalog lock poisoned");
        CatalogSnapshot {
            prices: state.prices.clone(),
            provenance: state.provenance,
            fetched_at: state.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_store::SqliteStore;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn bootstrap_without_snapshot_uses_bundled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let catalog = PricingCatalog::bootstrap(&store, DEFAULT_TTL);
        assert_eq!(catalog.provenance(), Provenance::Bundled);
        assert!(catalog.price_for("claude-sonnet-4-5-20250929").is_some());
    }

    #[test]
    fn bootstrap_with_fresh_snapshot_uses_cache_tier() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut prices = PriceTable::new();
        prices.insert("claude-custom".to_string(), ModelPrice::new(1.0, 2.0));
        store
            .save_pricing(&CatalogSnapshot {
                prices,
                provenance: Provenance::Network,
                fetched_at: Utc::now(),
            })
            .unwrap();

        let catalog = PricingCatalog::bootstrap(&store, DEFAULT_TTL);
        assert_eq!(catalog.provenance(), Provenance::Cache);
        assert!(catalog.price_for("claude-custom").is_some());
    }

    #[test]
    fn bootstrap_with_expired_snapshot_falls_back_to_bundled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut prices = PriceTable::new();
        prices.insert("claude-stale".to_string(), ModelPrice::new(1.0, 2.0));
        store
            .save_pricing(&CatalogSnapshot {
                prices,
                provenance: Provenance::Network,
                fetched_at: Utc::now() - Duration::hours(5),
            })
            .unwrap();

        let catalog = PricingCatalog::bootstrap(&store, DEFAULT_TTL);
        assert_eq!(catalog.provenance(), Provenance::Bundled);
        assert!(catalog.price_for("claude-stale").is_none());
    }

    #[test]
    fn install_network_overwrites_memory_and_disk() {
        let store = SqliteStore::open_in_memory().unwrap();
        let catalog = PricingCatalog::bootstrap(&store, DEFAULT_TTL);

        let mut table = PriceTable::new();
        table.insert("claude-next".to_string(), ModelPrice::new(5.0, 25.0));
        catalog.install_network(table, Utc::now(), &store);

        assert_eq!(catalog.provenance(), Provenance::Network);
        assert!(catalog.price_for("claude-next").is_some());
        assert!(catalog.price_for("claude-sonnet-4-5-20250929").is_none());

        let persisted = store.load_cached_pricing().unwrap().unwrap();
        assert_eq!(persisted.provenance, Provenance::Network);
        assert!(persisted.prices.contains_key("claude-next"));
    }

    #[test]
    fn bundled_tier_never_expires() {
        let catalog = PricingCatalog::from_parts(
            bundled_table(),
            Provenance::Bundled,
            ts("2020-01-01T00:00:00Z"),
            DEFAULT_TTL,
        );
        assert!(!catalog.is_expired(ts("2026-01-01T00:00:00Z")));
    }

    #[test]
    fn live_tiers_expire_after_ttl() {
        let catalog = PricingCatalog::from_parts(
            PriceTable::new(),
            Provenance::Network,
            ts("2026-01-01T00:00:00Z"),
            DEFAULT_TTL,
        );
        assert!(!catalog.is_expired(ts("2026-01-01T03:59:00Z")));
        assert!(catalog.is_expired(ts("2026-01-01T04:00:00Z")));
    }
}
