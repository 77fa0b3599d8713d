//! The ingestion pipeline: parse, dedup, cost-resolve, persist.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use tally_core::CostMode;
use tally_pricing::CostResolver;
use tally_store::PersistenceGateway;

use crate::dedup::dedup_batch;
use crate::parser;

/// Counters for one ingestion cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Files read this cycle
    pub files: usize,
    /// Records surviving parse + batch dedup
    pub records: usize,
    /// Rows newly inserted
    pub inserted: usize,
    /// Rows overwritten in place
    pub updated: usize,
    /// Batch-local duplicates dropped
    pub deduplicated: usize,
    /// Recognized non-usage lines
    pub skipped: usize,
    /// Unusable lines
    pub malformed: usize,
}

/// Consumes change batches and lands them in the store.
///
/// A failed upsert rolls back atomically; the cycle's paths are carried
/// into the next cycle, so replays stay idempotent through the gateway's
/// hash-keyed upsert.
pub struct IngestPipeline {
    gateway: Arc<dyn PersistenceGateway>,
    resolver: Arc<CostResolver>,
    mode: CostMode,
    retry: Vec<PathBuf>,
}

impl IngestPipeline {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        resolver: Arc<CostResolver>,
        mode: CostMode,
    ) -> Self {
        Self {
            gateway,
            resolver,
            mode,
            retry: Vec::new(),
        }
    }

    /// Ingest one batch of changed files plus any carry-over from a failed
    /// cycle.
    pub fn ingest(&mut self, changed: Vec<PathBuf>) -> IngestReport {
        let mut paths: Vec<PathBuf> = self.retry.drain(..).collect();
        for path in changed {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        let mut report = IngestReport::default();
        let mut batch = Vec::new();

        for path in &paths {
            match parser::parse_file(path) {
                Ok(scan) => {
                    report.files += 1;
                    report.skipped += scan.stats.skipped;
                    report.malformed += scan.stats.malformed;
                    batch.extend(scan.records);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to read telemetry file");
                }
            }
        }

        let (mut records, dropped) = dedup_batch(batch);
        report.deduplicated = dropped;
        report.records = records.len();

        for record in &mut records {
            record.cost_usd = self.resolver.resolve(record, self.mode);
        }

        match self.gateway.upsert(&records) {
            Ok(stats) => {
                report.inserted = stats.inserted;
                report.updated = stats.updated;
            }
            Err(e) => {
                warn!(error = %e, "upsert failed, batch carried to next cycle");
                self.retry = paths;
            }
        }

        report
    }

    /// Drain change batches until the channel closes.
    pub async fn run(mut self, mut changes: mpsc::Receiver<Vec<PathBuf>>) {
        while let Some(changed) = changes.recv().await {
            let report = self.ingest(changed);
            info!(
                files = report.files,
                records = report.records,
                inserted = report.inserted,
                updated = report.updated,
                deduplicated = report.deduplicated,
                malformed = report.malformed,
                "ingest cycle complete"
            );
        }
        info!("change channel closed, ingest pipeline stopping");
    }
}
