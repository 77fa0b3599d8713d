//! # tally-store
//!
//! Persistence for tally: the [`PersistenceGateway`] trait consumed by the
//! ingestion and pricing cores, and [`SqliteStore`], its SQLite-backed
//! implementation with transactional batch upserts and schema migrations.

pub mod error;
pub mod gateway;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use gateway::{ModelSpend, PersistenceGateway, UpsertStats};
pub use sqlite::SqliteStore;
