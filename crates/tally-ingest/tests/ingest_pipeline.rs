//! End-to-end ingestion tests: files on disk through parse, dedup, cost
//! resolution, and the SQLite gateway.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tally_core::{CostMode, PriceTable, Provenance};
use tally_ingest::IngestPipeline;
use tally_pricing::catalog::{PricingCatalog, DEFAULT_TTL};
use tally_pricing::coordinator::{UnknownModelCoordinator, DEFAULT_COOLDOWN};
use tally_pricing::fetcher::PriceFetcher;
use tally_pricing::CostResolver;
use tally_store::{PersistenceGateway, SqliteStore};

struct NeverFetcher;

#[async_trait]
impl PriceFetcher for NeverFetcher {
    async fn fetch(&self) -> tally_pricing::Result<PriceTable> {
        Err(tally_pricing::PricingError::Status { status: 503 })
    }
}

fn pipeline_with_store() -> (IngestPipeline, Arc<SqliteStore>, Arc<UnknownModelCoordinator>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let catalog = Arc::new(PricingCatalog::from_parts(
        tally_pricing::bundled::bundled_table(),
        Provenance::Bundled,
        Utc::now(),
        DEFAULT_TTL,
    ));
    let coordinator = Arc::new(UnknownModelCoordinator::new(
        Arc::clone(&catalog),
        Arc::clone(&store) as Arc<dyn PersistenceGateway>,
        DEFAULT_COOLDOWN,
    ));
    let resolver = Arc::new(CostResolver::new(
        catalog,
        Arc::clone(&coordinator),
        Arc::new(NeverFetcher) as Arc<dyn PriceFetcher>,
    ));
    let pipeline = IngestPipeline::new(
        Arc::clone(&store) as Arc<dyn PersistenceGateway>,
        resolver,
        CostMode::Auto,
    );
    (pipeline, store, coordinator)
}

fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn flat_line(message_id: &str, input: u64, cost: Option<f64>) -> String {
    let cost = match cost {
        Some(c) => format!(",\"costUSD\":{c}"),
        None => String::new(),
    };
    format!(
        "{{\"timestamp\":\"2026-01-15T10:30:00Z\",\"message\":{{\"model\":\"claude-sonnet-4-5-20250929\",\"id\":\"{message_id}\",\"usage\":{{\"input_tokens\":{input},\"output_tokens\":500}}}},\"requestId\":\"req-{message_id}\",\"sessionId\":\"sess-1\"{cost}}}"
    )
}

fn write_session(dir: &std::path::Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

#[tokio::test]
async fn ingests_files_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_session(
        dir.path(),
        "session.jsonl",
        &[
            flat_line("m1", 1000, None),
            flat_line("m2", 2000, Some(0.42)),
            "{\"type\":\"summary\",\"summary\":\"compact\"}".to_string(),
            "garbage line".to_string(),
        ],
    );

    let (mut pipeline, store, _) = pipeline_with_store();
    let report = pipeline.ingest(vec![path]);

    assert_eq!(report.files, 1);
    assert_eq!(report.records, 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.malformed, 1);

    let rows = store
        .records_in_range(ts("2026-01-15T00:00:00Z"), ts("2026-01-16T00:00:00Z"))
        .unwrap();
    assert_eq!(rows.len(), 2);

    // m2 carries a precalculated cost; auto mode trusts it
    let m2 = rows.iter().find(|r| r.message_id.as_deref() == Some("m2")).unwrap();
    assert!((m2.cost_usd - 0.42).abs() < 1e-9);

    // m1 derives from the bundled sonnet price: 1000 in + 500 out
    let m1 = rows.iter().find(|r| r.message_id.as_deref() == Some("m1")).unwrap();
    let expected = 1000.0 * 3.0 / 1e6 + 500.0 * 15.0 / 1e6;
    assert!((m1.cost_usd - expected).abs() < 1e-9);
}

#[tokio::test]
async fn replaying_a_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_session(
        dir.path(),
        "session.jsonl",
        &[flat_line("m1", 1000, None), flat_line("m2", 2000, None)],
    );

    let (mut pipeline, store, _) = pipeline_with_store();

    let first = pipeline.ingest(vec![path.clone()]);
    assert_eq!(first.inserted, 2);

    let second = pipeline.ingest(vec![path]);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);

    let rows = store
        .records_in_range(ts("2026-01-15T00:00:00Z"), ts("2026-01-16T00:00:00Z"))
        .unwrap();
    assert_eq!(rows.len(), 2, "replay must not add rows");
}

#[tokio::test]
async fn batch_local_duplicates_are_dropped_first_wins() {
    let dir = tempfile::tempdir().unwrap();
    // The same message appears in two files of one batch with different
    // token counts; the first file's version must win.
    let a = write_session(dir.path(), "a.jsonl", &[flat_line("m1", 111, None)]);
    let b = write_session(dir.path(), "b.jsonl", &[flat_line("m1", 999, None)]);

    let (mut pipeline, store, _) = pipeline_with_store();
    let report = pipeline.ingest(vec![a, b]);

    assert_eq!(report.deduplicated, 1);
    assert_eq!(report.inserted, 1);

    let rows = store
        .records_in_range(ts("2026-01-15T00:00:00Z"), ts("2026-01-16T00:00:00Z"))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tokens.input, 111);
}

#[tokio::test]
async fn unknown_models_land_with_zero_cost_and_register_pending() {
    let dir = tempfile::tempdir().unwrap();
    let line = "{\"timestamp\":\"2026-01-15T10:30:00Z\",\"message\":{\"model\":\"claude-unreleased\",\"id\":\"m9\",\"usage\":{\"input_tokens\":100,\"output_tokens\":100}},\"requestId\":\"req-m9\"}";
    let path = write_session(dir.path(), "session.jsonl", &[line.to_string()]);

    let (mut pipeline, store, coordinator) = pipeline_with_store();
    let report = pipeline.ingest(vec![path]);
    assert_eq!(report.inserted, 1);

    let rows = store
        .records_in_range(ts("2026-01-15T00:00:00Z"), ts("2026-01-16T00:00:00Z"))
        .unwrap();
    assert_eq!(rows[0].cost_usd, 0.0);

    // Escalation is fire-and-forget; let the spawned task run.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(coordinator.has_pending().await);
}

#[tokio::test]
async fn unreadable_files_do_not_abort_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_session(dir.path(), "good.jsonl", &[flat_line("m1", 100, None)]);
    let missing = dir.path().join("deleted.jsonl");

    let (mut pipeline, _, _) = pipeline_with_store();
    let report = pipeline.ingest(vec![missing, good]);

    assert_eq!(report.files, 1);
    assert_eq!(report.inserted, 1);
}
