//! Live pricing acquisition from the LiteLLM model database.
//!
//! The upstream document is keyed by model name with per-single-token costs;
//! tally converts to per-million on decode. The [`PriceFetcher`] trait is
//! the seam tests use to inject counting, delaying, or failing fetchers.

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Duration;
use tracing::debug;

use tally_core::{ModelPrice, PriceTable};

use crate::error::{PricingError, Result};

/// Upstream pricing document.
pub const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Maximum accepted response size.
const MAX_RESPONSE_BYTES: u64 = 5_000_000;

/// Request timeout for the pricing endpoint.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for the pricing endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of model price tables.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Fetch a full price table. Runs to completion or failure; callers
    /// never cancel a fetch mid-flight.
    async fn fetch(&self) -> Result<PriceTable>;
}

/// HTTP fetcher for the LiteLLM pricing document.
pub struct LiteLlmFetcher {
    client: reqwest::Client,
    url: String,
}

impl LiteLlmFetcher {
    /// Create a fetcher pointed at the production endpoint.
    pub fn new() -> Result<Self> {
        Self::with_url(LITELLM_PRICING_URL)
    }

    /// Create a fetcher pointed at a custom URL (tests).
    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PriceFetcher for LiteLlmFetcher {
    async fn fetch(&self) -> Result<PriceTable> {
        debug!(url = %self.url, "fetching pricing document");

        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PricingError::Status {
                status: status.as_u16(),
            });
        }

        if let Some(bytes) = response.content_length() {
            if bytes > MAX_RESPONSE_BYTES {
                return Err(PricingError::TooLarge { bytes });
            }
        }

        let document: Value = response.json().await?;
        let table = decode_price_table(&document);
        debug!(models = table.len(), "decoded pricing document");
        Ok(table)
    }
}

/// Convert the per-token upstream document into a per-million price table.
///
/// Entries without an input or output cost carry no billable information
/// and are dropped.
pub fn decode_price_table(document: &Value) -> PriceTable {
    let mut table = PriceTable::new();

    let Some(entries) = document.as_object() else {
        return table;
    };

    for (model, entry) in entries {
        let input = per_token(entry, "input_cost_per_token");
        let output = per_token(entry, "output_cost_per_token");
        if input.is_none() && output.is_none() {
            continue;
        }

        table.insert(
            model.clone(),
            ModelPrice {
                input_per_million: per_million(input),
                output_per_million: per_million(output),
                cache_creation_per_million: per_million(per_token(
                    entry,
                    "cache_creation_input_token_cost",
                )),
                cache_read_per_million: per_million(per_token(
                    entry,
                    "cache_read_input_token_cost",
                )),
            },
        );
    }

    table
}

fn per_token(entry: &Value, key: &str) -> Option<f64> {
    entry.get(key).and_then(Value::as_f64)
}

fn per_million(per_token: Option<f64>) -> f64 {
    per_token.map(|cost| cost * 1_000_000.0).unwrap_or(0.0)
}
