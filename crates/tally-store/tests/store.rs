//! Integration tests for the SQLite persistence gateway.

use chrono::{DateTime, Utc};
use tally_core::{CatalogSnapshot, ModelPrice, Provenance, TokenCounts, UsageRecord};
use tally_store::{PersistenceGateway, SqliteStore};

fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn record(ts_raw: &str, model: &str, message_id: Option<&str>, cost: f64) -> UsageRecord {
    let mut record = UsageRecord::new(
        ts(ts_raw),
        model,
        TokenCounts {
            input: 1000,
            output: 500,
            cache_creation: 0,
            cache_read: 0,
        },
        "session.jsonl",
    )
    .with_identity(
        message_id.map(str::to_string),
        message_id.map(|m| format!("req-{m}")),
    );
    record.cost_usd = cost;
    record
}

#[test]
fn upsert_twice_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let batch = vec![
        record("2026-01-01T10:00:00Z", "claude-sonnet-4-5", Some("m1"), 0.5),
        record("2026-01-01T11:00:00Z", "claude-opus-4-5", Some("m2"), 2.0),
    ];

    let first = store.upsert(&batch).unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.updated, 0);

    let second = store.upsert(&batch).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);

    let sum = store
        .cost_sum(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert!((sum - 2.5).abs() < 1e-9);

    let rows = store
        .records_in_range(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn replay_overwrites_fields_in_place() {
    let store = SqliteStore::open_in_memory().unwrap();
    let original = record("2026-01-01T10:00:00Z", "claude-sonnet-4-5", Some("m1"), 0.5);
    store.upsert(std::slice::from_ref(&original)).unwrap();

    let mut replayed = original.clone();
    replayed.cost_usd = 0.75;
    replayed.tokens.output = 900;
    store.upsert(std::slice::from_ref(&replayed)).unwrap();

    let rows = store
        .records_in_range(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].cost_usd - 0.75).abs() < 1e-9);
    assert_eq!(rows[0].tokens.output, 900);
}

#[test]
fn unhashable_records_always_insert() {
    let store = SqliteStore::open_in_memory().unwrap();
    let unhashable = record("2026-01-01T10:00:00Z", "claude-sonnet-4-5", None, 0.1);

    store.upsert(std::slice::from_ref(&unhashable)).unwrap();
    let stats = store.upsert(std::slice::from_ref(&unhashable)).unwrap();
    assert_eq!(stats.inserted, 1);

    let rows = store
        .records_in_range(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn cost_by_model_groups_and_orders_by_spend() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert(&[
            record("2026-01-01T10:00:00Z", "claude-sonnet-4-5", Some("m1"), 0.5),
            record("2026-01-01T11:00:00Z", "claude-sonnet-4-5", Some("m2"), 0.5),
            record("2026-01-01T12:00:00Z", "claude-opus-4-5", Some("m3"), 5.0),
        ])
        .unwrap();

    let spend = store
        .cost_by_model(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();

    assert_eq!(spend.len(), 2);
    assert_eq!(spend[0].model, "claude-opus-4-5");
    assert!((spend[0].total_cost_usd - 5.0).abs() < 1e-9);
    assert_eq!(spend[1].model, "claude-sonnet-4-5");
    assert_eq!(spend[1].record_count, 2);
}

#[test]
fn range_bounds_are_inclusive_exclusive() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert(&[
            record("2026-01-01T00:00:00Z", "claude-sonnet-4-5", Some("m1"), 1.0),
            record("2026-01-02T00:00:00Z", "claude-sonnet-4-5", Some("m2"), 1.0),
        ])
        .unwrap();

    let sum = store
        .cost_sum(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert!((sum - 1.0).abs() < 1e-9);
}

#[test]
fn backfill_updates_costs_by_row_id() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert(&[record(
            "2026-01-01T10:00:00Z",
            "claude-sonnet-4-5",
            Some("m1"),
            0.0,
        )])
        .unwrap();

    let rows = store
        .records_in_range(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    let id = rows[0].id.unwrap();

    let updated = store.backfill_costs(&[(id, 1.25)]).unwrap();
    assert_eq!(updated, 1);

    let sum = store
        .cost_sum(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert!((sum - 1.25).abs() < 1e-9);
}

#[test]
fn pricing_snapshot_round_trips() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.load_cached_pricing().unwrap().is_none());

    let mut prices = std::collections::HashMap::new();
    prices.insert(
        "claude-sonnet-4-5".to_string(),
        ModelPrice::new(3.0, 15.0).with_cache(3.75, 0.30),
    );
    let snapshot = CatalogSnapshot {
        prices,
        provenance: Provenance::Network,
        fetched_at: ts("2026-01-01T10:00:00Z"),
    };

    store.save_pricing(&snapshot).unwrap();
    let loaded = store.load_cached_pricing().unwrap().unwrap();

    assert_eq!(loaded.provenance, Provenance::Network);
    assert_eq!(loaded.fetched_at, snapshot.fetched_at);
    let price = loaded.prices.get("claude-sonnet-4-5").unwrap();
    assert!((price.input_per_million - 3.0).abs() < 1e-9);
    assert!((price.cache_read_per_million - 0.30).abs() < 1e-9);
}

#[test]
fn save_pricing_replaces_previous_snapshot() {
    let store = SqliteStore::open_in_memory().unwrap();
    let snapshot = CatalogSnapshot {
        prices: std::collections::HashMap::new(),
        provenance: Provenance::Bundled,
        fetched_at: ts("2026-01-01T10:00:00Z"),
    };
    store.save_pricing(&snapshot).unwrap();

    let newer = CatalogSnapshot {
        provenance: Provenance::Network,
        fetched_at: ts("2026-01-01T12:00:00Z"),
        ..snapshot
    };
    store.save_pricing(&newer).unwrap();

    let loaded = store.load_cached_pricing().unwrap().unwrap();
    assert_eq!(loaded.provenance, Provenance::Network);
    assert_eq!(loaded.fetched_at, newer.fetched_at);
}

#[test]
fn store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .upsert(&[record(
                "2026-01-01T10:00:00Z",
                "claude-sonnet-4-5",
                Some("m1"),
                0.5,
            )])
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let sum = store
        .cost_sum(ts("2026-01-01T00:00:00Z"), ts("2026-01-02T00:00:00Z"))
        .unwrap();
    assert!((sum - 0.5).abs() < 1e-9);
}
