//! Periodic catalog refresh with gap-adaptive pacing.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::coordinator::UnknownModelCoordinator;
use crate::fetcher::PriceFetcher;

/// Scheduler pacing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refreshes when no models are awaiting pricing.
    pub normal_interval: Duration,
    /// Floor for the fast interval used while models are pending.
    pub min_fast_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            normal_interval: Duration::from_secs(4 * 60 * 60),
            min_fast_interval: Duration::from_secs(1),
        }
    }
}

/// Periodically refreshes the pricing catalog through the coordinator.
///
/// Two modes: a long fixed interval while the pending set is empty, and a
/// fast interval equal to the remaining fetch cooldown (at least one second)
/// while models await pricing, so catalog gaps self-heal without hammering
/// the network. After every attempt the timer is re-armed exactly once, so
/// refreshes never overlap.
pub struct RefreshScheduler {
    coordinator: Arc<UnknownModelCoordinator>,
    fetcher: Arc<dyn PriceFetcher>,
    config: SchedulerConfig,
}

impl RefreshScheduler {
    pub fn new(
        coordinator: Arc<UnknownModelCoordinator>,
        fetcher: Arc<dyn PriceFetcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            coordinator,
            fetcher,
            config,
        }
    }

    /// Run the refresh loop until the shutdown channel fires. The first
    /// attempt happens immediately so a stale startup catalog upgrades as
    /// soon as the network allows.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("pricing refresh scheduler started");
            loop {
                let outcome = self
                    .coordinator
                    .refresh(Arc::clone(&self.fetcher))
                    .await;
                debug!(outcome = ?outcome, "catalog refresh attempt");

                let delay = self.next_interval().await;
                debug!(delay_secs = delay.as_secs(), "refresh rescheduled");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        info!("pricing refresh scheduler stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Interval until the next attempt, derived from the pending set.
    pub async fn next_interval(&self) -> Duration {
        if self.coordinator.has_pending().await {
            self.coordinator
                .remaining_cooldown()
                .await
                .max(self.config.min_fast_interval)
        } else {
            self.config.normal_interval
        }
    }
}
