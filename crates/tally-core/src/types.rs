//! Core data model for usage telemetry and pricing.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts extracted from a single usage record.
///
/// Cache fields are absent in older log formats and default to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    /// Input (prompt) tokens
    pub input: u64,

    /// Output (completion) tokens
    pub output: u64,

    /// Cache creation input tokens
    #[serde(default)]
    pub cache_creation: u64,

    /// Cache read input tokens
    #[serde(default)]
    pub cache_read: u64,
}

impl TokenCounts {
    /// Total tokens across all four counters.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }
}

/// One normalized unit of model usage extracted from a log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Row id once persisted
    pub id: Option<i64>,

    /// Timestamp of the API call (UTC)
    pub ts: DateTime<Utc>,

    /// Model identifier (e.g. "claude-sonnet-4-5-20250929")
    pub model: String,

    /// Token usage for this call
    pub tokens: TokenCounts,

    /// Cost reported by the emitting CLI, if any (USD)
    pub precalculated_cost: Option<f64>,

    /// Resolved cost in USD
    pub cost_usd: f64,

    /// Session identifier from the log
    pub session_id: Option<String>,

    /// Request identifier from the log
    pub request_id: Option<String>,

    /// Message identifier from the log
    pub message_id: Option<String>,

    /// Originating log file path
    pub source: String,
}

impl UsageRecord {
    /// Create a record with required fields; optional fields start empty.
    pub fn new(
        ts: DateTime<Utc>,
        model: impl Into<String>,
        tokens: TokenCounts,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            ts,
            model: model.into(),
            tokens,
            precalculated_cost: None,
            cost_usd: 0.0,
            session_id: None,
            request_id: None,
            message_id: None,
            source: source.into(),
        }
    }

    /// Set the session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the message/request identity pair.
    pub fn with_identity(
        mut self,
        message_id: Option<String>,
        request_id: Option<String>,
    ) -> Self {
        self.message_id = message_id;
        self.request_id = request_id;
        self
    }

    /// Set the precalculated cost reported by the CLI.
    pub fn with_precalculated_cost(mut self, cost: Option<f64>) -> Self {
        self.precalculated_cost = cost;
        self
    }

    /// Identity hash used for deduplication.
    ///
    /// Returns `None` when either id is missing; such records are unhashable
    /// and always treated as new on ingestion.
    pub fn identity_hash(&self) -> Option<String> {
        let message_id = self.message_id.as_deref()?;
        let request_id = self.request_id.as_deref()?;
        Some(format!("{message_id}:{request_id}"))
    }
}

/// Per-million-token pricing for one model.
///
/// Components the catalog does not know are zero and contribute nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_creation_per_million: f64,
    pub cache_read_per_million: f64,
}

impl ModelPrice {
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cache_creation_per_million: 0.0,
            cache_read_per_million: 0.0,
        }
    }

    pub fn with_cache(mut self, creation: f64, read: f64) -> Self {
        self.cache_creation_per_million = creation;
        self.cache_read_per_million = read;
        self
    }
}

/// Model name to price mapping.
pub type PriceTable = HashMap<String, ModelPrice>;

/// Which tier produced the current pricing catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Fetched from the live pricing endpoint
    Network,
    /// Loaded from the persisted on-disk snapshot
    Cache,
    /// Built-in static table, never expires
    Bundled,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Network => write!(f, "network"),
            Provenance::Cache => write!(f, "cache"),
            Provenance::Bundled => write!(f, "bundled"),
        }
    }
}

/// Persistable form of the pricing catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub prices: PriceTable,
    pub provenance: Provenance,
    pub fetched_at: DateTime<Utc>,
}

/// Policy selecting whether to trust a precalculated cost field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Use the precalculated cost, 0 when absent
    Display,
    /// Always derive from token counts
    Calculate,
    /// Precalculated when present, derived otherwise
    #[default]
    Auto,
}

impl FromStr for CostMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "display" => Ok(CostMode::Display),
            "calculate" => Ok(CostMode::Calculate),
            "auto" => Ok(CostMode::Auto),
            other => Err(format!("unknown cost mode: {other}")),
        }
    }
}

/// Derive the USD cost of a token usage under the given price.
pub fn compute_token_cost(tokens: &TokenCounts, price: &ModelPrice) -> f64 {
    (tokens.input as f64 * price.input_per_million / 1_000_000.0)
        + (tokens.output as f64 * price.output_per_million / 1_000_000.0)
        + (tokens.cache_creation as f64 * price.cache_creation_per_million / 1_000_000.0)
        + (tokens.cache_read as f64 * price.cache_read_per_million / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet_price() -> ModelPrice {
        ModelPrice::new(3.0, 15.0).with_cache(3.75, 0.30)
    }

    #[test]
    fn identity_hash_joins_message_and_request_ids() {
        let record = UsageRecord::new(
            Utc::now(),
            "claude-sonnet-4-5",
            TokenCounts::default(),
            "a.jsonl",
        )
        .with_identity(Some("msg_01".to_string()), Some("req_01".to_string()));

        assert_eq!(record.identity_hash(), Some("msg_01:req_01".to_string()));
    }

    #[test]
    fn identity_hash_requires_both_ids() {
        let base = UsageRecord::new(
            Utc::now(),
            "claude-sonnet-4-5",
            TokenCounts::default(),
            "a.jsonl",
        );

        let missing_request = base
            .clone()
            .with_identity(Some("msg_01".to_string()), None);
        assert_eq!(missing_request.identity_hash(), None);

        let missing_message = base.with_identity(None, Some("req_01".to_string()));
        assert_eq!(missing_message.identity_hash(), None);
    }

    #[test]
    fn cost_formula_matches_reference_fixture() {
        let tokens = TokenCounts {
            input: 1_000_000,
            output: 1_000_000,
            cache_creation: 500_000,
            cache_read: 500_000,
        };

        let cost = compute_token_cost(&tokens, &sonnet_price());

        // 3 + 15 + 1.875 + 0.15
        assert!((cost - 20.025).abs() < 1e-6);
    }

    #[test]
    fn missing_price_components_contribute_nothing() {
        let tokens = TokenCounts {
            input: 1_000_000,
            output: 0,
            cache_creation: 1_000_000,
            cache_read: 1_000_000,
        };
        let price = ModelPrice::new(2.0, 10.0);

        assert!((compute_token_cost(&tokens, &price) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cost_mode_parses_from_config_strings() {
        assert_eq!("auto".parse::<CostMode>().unwrap(), CostMode::Auto);
        assert_eq!("Display".parse::<CostMode>().unwrap(), CostMode::Display);
        assert_eq!(
            "calculate".parse::<CostMode>().unwrap(),
            CostMode::Calculate
        );
        assert!("cheapest".parse::<CostMode>().is_err());
    }

    #[test]
    fn token_totals_sum_all_counters() {
        let tokens = TokenCounts {
            input: 100,
            output: 50,
            cache_creation: 200,
            cache_read: 300,
        };
        assert_eq!(tokens.total(), 650);
    }
}
