//! Application wiring: store, pricing service, watcher, pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;

use tally_core::CostMode;
use tally_ingest::{
    discover_files, IngestPipeline, IngestReport, LogWatcher, WatcherConfig,
};
use tally_pricing::{
    CostResolver, LiteLlmFetcher, PriceFetcher, PricingCatalog, RefreshScheduler,
    SchedulerConfig, UnknownModelCoordinator,
};
use tally_store::{PersistenceGateway, SqliteStore};

use crate::config::TallyConfig;

/// The assembled service graph. All dependencies are injected explicitly;
/// there is no ambient global state.
pub struct App {
    config: TallyConfig,
    store: Arc<SqliteStore>,
    catalog: Arc<PricingCatalog>,
    coordinator: Arc<UnknownModelCoordinator>,
    resolver: Arc<CostResolver>,
    fetcher: Arc<dyn PriceFetcher>,
}

impl App {
    /// Open the store, bootstrap the pricing catalog from its best tier,
    /// and wire the resolver and coordinator.
    pub fn build(config: TallyConfig) -> anyhow::Result<Self> {
        let db_path = config.db_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let store = Arc::new(SqliteStore::open(&db_path)?);
        info!(db = %db_path.display(), "store opened");

        let ttl = chrono::Duration::hours(config.pricing.ttl_hours);
        let catalog = Arc::new(PricingCatalog::bootstrap(store.as_ref(), ttl));
        let coordinator = Arc::new(UnknownModelCoordinator::new(
            Arc::clone(&catalog),
            Arc::clone(&store) as Arc<dyn PersistenceGateway>,
            Duration::from_secs(config.pricing.cooldown_secs),
        ));
        let fetcher: Arc<dyn PriceFetcher> = Arc::new(LiteLlmFetcher::new()?);
        let resolver = Arc::new(CostResolver::new(
            Arc::clone(&catalog),
            Arc::clone(&coordinator),
            Arc::clone(&fetcher),
        ));

        Ok(Self {
            config,
            store,
            catalog,
            coordinator,
            resolver,
            fetcher,
        })
    }

    fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(
            Arc::clone(&self.store) as Arc<dyn PersistenceGateway>,
            Arc::clone(&self.resolver),
            self.config.cost_mode,
        )
    }

    /// Daemon mode: refresh scheduler plus debounced watching of the
    /// telemetry roots, until ctrl-c.
    pub async fn run_watch(&self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = RefreshScheduler::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.fetcher),
            SchedulerConfig {
                normal_interval: Duration::from_secs(self.config.pricing.refresh_interval_secs),
                min_fast_interval: Duration::from_secs(
                    self.config.pricing.min_fast_interval_secs,
                ),
            },
        );
        let scheduler_handle = scheduler.spawn(shutdown_rx);

        let roots = self.config.telemetry_roots();
        let watcher_config = WatcherConfig::new(roots.clone())
            .with_debounce(Duration::from_millis(self.config.debounce_ms));
        let (watcher, changes) = LogWatcher::spawn(watcher_config)?;

        let mut pipeline = self.pipeline();

        // Land existing history before live change events arrive.
        let existing = discover_files(&roots);
        if !existing.is_empty() {
            let report = pipeline.ingest(existing);
            info!(
                files = report.files,
                records = report.records,
                inserted = report.inserted,
                updated = report.updated,
                "initial scan complete"
            );
        }

        let pipeline_handle = tokio::spawn(pipeline.run(changes));

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("shutdown requested");

        let _ = shutdown_tx.send(true);
        // Dropping the watcher closes the change channel, which ends the
        // pipeline task.
        drop(watcher);

        scheduler_handle.await.ok();
        pipeline_handle.await.ok();
        Ok(())
    }

    /// One-shot ingest of every discovered telemetry file.
    pub async fn run_scan(&self) -> anyhow::Result<IngestReport> {
        let roots = self.config.telemetry_roots();
        let files = discover_files(&roots);
        info!(files = files.len(), "scanning telemetry roots");

        let mut pipeline = self.pipeline();
        Ok(pipeline.ingest(files))
    }

    /// Range cost report: total plus per-model spend.
    pub fn summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<(f64, Vec<tally_store::ModelSpend>)> {
        let total = self.store.cost_sum(start, end)?;
        let by_model = self.store.cost_by_model(start, end)?;
        Ok((total, by_model))
    }

    /// Which tier currently backs the pricing catalog.
    pub fn pricing_provenance(&self) -> tally_core::Provenance {
        self.catalog.provenance()
    }

    /// Recompute stored costs in place under the given mode.
    pub async fn recalculate(
        &self,
        mode: CostMode,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let records = self.store.records_in_range(start, end)?;

        let updates: Vec<(i64, f64)> = records
            .iter()
            .filter_map(|record| {
                let id = record.id?;
                Some((id, self.resolver.resolve(record, mode)))
            })
            .collect();

        let count = self.store.backfill_costs(&updates)?;
        info!(count, mode = ?mode, "recalculated record costs");
        Ok(count)
    }
}
