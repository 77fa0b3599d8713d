//! SQLite implementation of the persistence gateway.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use tally_core::{CatalogSnapshot, PriceTable, Provenance, TokenCounts, UsageRecord};

use crate::error::{Result, StoreError};
use crate::gateway::{ModelSpend, PersistenceGateway, UpsertStats};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Maximum retries for database lock errors.
const DB_LOCK_MAX_RETRIES: u32 = 5;

/// Initial delay for database lock retry (in milliseconds).
const DB_LOCK_INITIAL_DELAY_MS: u64 = 50;

/// Maximum delay for database lock retry.
const DB_LOCK_MAX_DELAY: Duration = Duration::from_secs(5);

/// SQLite-backed usage and pricing store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Execute a database operation with automatic retry on lock errors.
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(DB_LOCK_INITIAL_DELAY_MS);

        loop {
            attempt += 1;

            match f() {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, operation, "database operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ref e) if e.is_database_locked() && attempt <= DB_LOCK_MAX_RETRIES => {
                    warn!(
                        attempt,
                        max_retries = DB_LOCK_MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        operation,
                        "database locked, retrying with backoff"
                    );
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, DB_LOCK_MAX_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(format!("failed to acquire lock: {e}")))
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Migration(format!("failed to acquire lock: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "running database migrations"
            );
            if current_version < 1 {
                Self::migration_v1(&conn)?;
            }
        }

        Ok(())
    }

    /// Migration to version 1: usage records and pricing cache.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("running migration v1: initial schema");

        // NULL identity hashes never conflict, so unhashable records always
        // insert as fresh rows.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_hash TEXT UNIQUE,
                ts TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens INTEGER NOT NULL DEFAULT 0,
                precalculated_cost REAL,
                cost_usd REAL NOT NULL,
                session_id TEXT,
                request_id TEXT,
                message_id TEXT,
                source TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_usage_records_ts
             ON usage_records(ts)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_usage_records_model
             ON usage_records(model)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_usage_records_session
             ON usage_records(session_id)",
            [],
        )?;

        // Single-row pricing snapshot
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pricing_cache (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                fetched_at TEXT NOT NULL,
                provenance TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

        info!("migration v1 completed");
        Ok(())
    }

    fn upsert_in_tx(tx: &Transaction, records: &[UsageRecord]) -> Result<UpsertStats> {
        let mut exists_stmt =
            tx.prepare_cached("SELECT 1 FROM usage_records WHERE identity_hash = ?1")?;
        let mut insert_stmt = tx.prepare_cached(
            "INSERT INTO usage_records
             (identity_hash, ts, model, input_tokens, output_tokens,
              cache_creation_tokens, cache_read_tokens, precalculated_cost,
              cost_usd, session_id, request_id, message_id, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        let mut update_stmt = tx.prepare_cached(
            "UPDATE usage_records SET
                ts = ?2, model = ?3, input_tokens = ?4, output_tokens = ?5,
                cache_creation_tokens = ?6, cache_read_tokens = ?7,
                precalculated_cost = ?8, cost_usd = ?9, session_id = ?10,
                request_id = ?11, message_id = ?12, source = ?13
             WHERE identity_hash = ?1",
        )?;

        let mut stats = UpsertStats::default();
        for record in records {
            let hash = record.identity_hash();
            let already_stored = match hash.as_deref() {
                Some(h) => exists_stmt
                    .query_row(params![h], |_| Ok(()))
                    .optional()?
                    .is_some(),
                None => false,
            };

            let values = params![
                hash,
                ts_to_db(record.ts),
                record.model,
                record.tokens.input as i64,
                record.tokens.output as i64,
                record.tokens.cache_creation as i64,
                record.tokens.cache_read as i64,
                record.precalculated_cost,
                record.cost_usd,
                record.session_id,
                record.request_id,
                record.message_id,
                record.source,
            ];

            if already_stored {
                update_stmt.execute(values)?;
                stats.updated += 1;
            } else {
                insert_stmt.execute(values)?;
                stats.inserted += 1;
            }
        }

        Ok(stats)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<UsageRecord> {
        let ts_str: String = row.get(2)?;
        Ok(UsageRecord {
            id: Some(row.get(0)?),
            // column 1 is the identity hash, derived on read from its parts
            ts: ts_from_db(&ts_str),
            model: row.get(3)?,
            tokens: TokenCounts {
                input: row.get::<_, i64>(4)? as u64,
                output: row.get::<_, i64>(5)? as u64,
                cache_creation: row.get::<_, i64>(6)? as u64,
                cache_read: row.get::<_, i64>(7)? as u64,
            },
            precalculated_cost: row.get(8)?,
            cost_usd: row.get(9)?,
            session_id: row.get(10)?,
            request_id: row.get(11)?,
            message_id: row.get(12)?,
            source: row.get(13)?,
        })
    }
}

impl PersistenceGateway for SqliteStore {
    fn upsert(&self, records: &[UsageRecord]) -> Result<UpsertStats> {
        if records.is_empty() {
            return Ok(UpsertStats::default());
        }

        self.with_retry("upsert", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let stats = Self::upsert_in_tx(&tx, records)?;
            tx.commit()?;
            debug!(
                inserted = stats.inserted,
                updated = stats.updated,
                "upserted usage records"
            );
            Ok(stats)
        })
    }

    fn cost_sum(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64> {
        let conn = self.lock()?;
        let sum: f64 = conn.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0)
             FROM usage_records
             WHERE ts >= ?1 AND ts < ?2",
            params![ts_to_db(start), ts_to_db(end)],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    fn cost_by_model(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<ModelSpend>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT model, COALESCE(SUM(cost_usd), 0), COUNT(*)
             FROM usage_records
             WHERE ts >= ?1 AND ts < ?2
             GROUP BY model
             ORDER BY SUM(cost_usd) DESC",
        )?;

        let spend: Vec<ModelSpend> = stmt
            .query_map(params![ts_to_db(start), ts_to_db(end)], |row| {
                Ok(ModelSpend {
                    model: row.get(0)?,
                    total_cost_usd: row.get(1)?,
                    record_count: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(spend)
    }

    fn records_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, identity_hash, ts, model, input_tokens, output_tokens,
                    cache_creation_tokens, cache_read_tokens, precalculated_cost,
                    cost_usd, session_id, request_id, message_id, source
             FROM usage_records
             WHERE ts >= ?1 AND ts < ?2
             ORDER BY ts ASC",
        )?;

        let records: Vec<UsageRecord> = stmt
            .query_map(params![ts_to_db(start), ts_to_db(end)], Self::row_to_record)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    fn backfill_costs(&self, updates: &[(i64, f64)]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        self.with_retry("backfill_costs", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let mut count = 0;
            {
                let mut stmt =
                    tx.prepare_cached("UPDATE usage_records SET cost_usd = ?2 WHERE id = ?1")?;
                for (id, cost) in updates {
                    count += stmt.execute(params![id, cost])?;
                }
            }
            tx.commit()?;
            debug!(count, "backfilled record costs");
            Ok(count)
        })
    }

    fn load_cached_pricing(&self) -> Result<Option<CatalogSnapshot>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT fetched_at, provenance, payload FROM pricing_cache WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((fetched_at, provenance, payload)) = row else {
            return Ok(None);
        };

        let prices: PriceTable = serde_json::from_str(&payload)?;
        let provenance = match provenance.as_str() {
            "network" => Provenance::Network,
            "bundled" => Provenance::Bundled,
            _ => Provenance::Cache,
        };

        Ok(Some(CatalogSnapshot {
            prices,
            provenance,
            fetched_at: ts_from_db(&fetched_at),
        }))
    }

    fn save_pricing(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let payload = serde_json::to_string(&snapshot.prices)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pricing_cache (id, fetched_at, provenance, payload)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                provenance = excluded.provenance,
                payload = excluded.payload",
            params![
                ts_to_db(snapshot.fetched_at),
                snapshot.provenance.to_string(),
                payload
            ],
        )?;
        debug!(
            models = snapshot.prices.len(),
            provenance = %snapshot.provenance,
            "saved pricing snapshot"
        );
        Ok(())
    }
}

/// Fixed-width UTC text form so lexicographic range scans order correctly.
fn ts_to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ts_from_db(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}
