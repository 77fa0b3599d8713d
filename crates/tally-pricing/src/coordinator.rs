//! Single-flight coordination for unknown-model pricing fetches.
//!
//! Every cost computation that hits an unpriced model lands here, possibly
//! from many tasks at once. The invariant: at most one pricing fetch is ever
//! in flight, and any number of concurrent callers share its eventual
//! result. A cooldown bounds how often failed lookups can retrigger the
//! network.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use tally_store::PersistenceGateway;

use crate::catalog::PricingCatalog;
use crate::fetcher::PriceFetcher;

/// Default minimum time between fetch attempts.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Shared result of one coordinated fetch attempt.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The catalog was overwritten with a fetched table of this many models.
    Updated { models: usize },
    /// The fetch failed; pending models are untouched.
    Failed(String),
    /// In cooldown with no active fetch; no network call was issued.
    Cooldown,
}

impl FetchOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, FetchOutcome::Updated { .. })
    }
}

struct FlightState {
    pending: HashSet<String>,
    active: Option<broadcast::Sender<FetchOutcome>>,
    last_attempt: Option<Instant>,
}

/// Serializes all pending/active-fetch state behind one lock.
pub struct UnknownModelCoordinator {
    catalog: Arc<PricingCatalog>,
    gateway: Arc<dyn PersistenceGateway>,
    cooldown: Duration,
    state: Arc<Mutex<FlightState>>,
}

impl UnknownModelCoordinator {
    pub fn new(
        catalog: Arc<PricingCatalog>,
        gateway: Arc<dyn PersistenceGateway>,
        cooldown: Duration,
    ) -> Self {
        Self {
            catalog,
            gateway,
            cooldown,
            state: Arc::new(Mutex::new(FlightState {
                pending: HashSet::new(),
                active: None,
                last_attempt: None,
            })),
        }
    }

    /// Register `model` as awaiting pricing and drive resolution.
    ///
    /// Joins the active fetch if one exists, starts one if the cooldown has
    /// elapsed, and otherwise returns [`FetchOutcome::Cooldown`] without
    /// touching the network. The model stays pending until a fetched table
    /// contains it or a caller marks it resolved.
    pub async fn request_pricing(
        &self,
        model: &str,
        fetcher: Arc<dyn PriceFetcher>,
    ) -> FetchOutcome {
        let mut state = self.state.lock().await;
        if state.pending.insert(model.to_string()) {
            debug!(model, "model awaiting pricing");
        }
        self.run_flight(state, fetcher).await
    }

    /// Drive a catalog refresh through the same single-flight machinery so
    /// scheduler-initiated and miss-initiated fetches can never overlap.
    pub async fn refresh(&self, fetcher: Arc<dyn PriceFetcher>) -> FetchOutcome {
        let state = self.state.lock().await;
        self.run_flight(state, fetcher).await
    }

    async fn run_flight(
        &self,
        mut state: MutexGuard<'_, FlightState>,
        fetcher: Arc<dyn PriceFetcher>,
    ) -> FetchOutcome {
        // Join the in-flight fetch: subscription happens under the same
        // lock that clears `active`, so the result cannot be missed.
        if let Some(active) = &state.active {
            let mut rx = active.subscribe();
            drop(state);
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => FetchOutcome::Failed("pricing fetch interrupted".to_string()),
            };
        }

        if let Some(last) = state.last_attempt {
            if last.elapsed() < self.cooldown {
                return FetchOutcome::Cooldown;
            }
        }

        let (tx, mut rx) = broadcast::channel(1);
        state.active = Some(tx.clone());
        state.last_attempt = Some(Instant::now());
        drop(state);

        // The flight runs in its own task: a cancelled caller can never
        // leave the active slot occupied.
        let flight_state = Arc::clone(&self.state);
        let catalog = Arc::clone(&self.catalog);
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            debug!("starting pricing fetch");
            let outcome = match fetcher.fetch().await {
                Ok(table) => {
                    let models = table.len();
                    catalog.install_network(table, Utc::now(), gateway.as_ref());
                    FetchOutcome::Updated { models }
                }
                Err(e) => {
                    warn!(error = %e, "pricing fetch failed");
                    FetchOutcome::Failed(e.to_string())
                }
            };

            let mut state = flight_state.lock().await;
            state.active = None;
            if outcome.is_updated() {
                state.pending.retain(|model| catalog.price_for(model).is_none());
            }
            let _ = tx.send(outcome);
        });

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::Failed("pricing fetch interrupted".to_string()),
        }
    }

    /// Explicitly remove a model from the pending set.
    pub async fn mark_resolved(&self, model: &str) {
        self.state.lock().await.pending.remove(model);
    }

    /// Whether any models are awaiting pricing.
    pub async fn has_pending(&self) -> bool {
        !self.state.lock().await.pending.is_empty()
    }

    /// Snapshot of models awaiting pricing.
    pub async fn pending_models(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut models: Vec<String> = state.pending.iter().cloned().collect();
        models.sort();
        models
    }

    /// Time until the cooldown allows another fetch attempt; zero if one
    /// could start now.
    pub async fn remaining_cooldown(&self) -> Duration {
        let state = self.state.lock().await;
        match state.last_attempt {
            Some(last) => self.cooldown.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }
}
