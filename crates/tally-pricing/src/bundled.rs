//! Built-in fallback pricing.
//!
//! The ultimate catalog tier: always valid, never expires. Prices are USD
//! per million tokens, current as of early 2026. The live endpoint
//! supersedes these the first time a fetch lands.

use tally_core::{ModelPrice, PriceTable};

/// Static price table used when neither the network nor the disk snapshot
/// can provide a catalog.
pub fn bundled_table() -> PriceTable {
    let mut table = PriceTable::new();

    // Opus family
    let opus = ModelPrice::new(15.0, 75.0).with_cache(18.75, 1.50);
    table.insert("claude-opus-4-5-20251101".to_string(), opus);
    table.insert("claude-opus-4-20250514".to_string(), opus);
    table.insert("claude-opus-4-5".to_string(), opus);

    // Sonnet family
    let sonnet = ModelPrice::new(3.0, 15.0).with_cache(3.75, 0.30);
    table.insert("claude-sonnet-4-5-20250929".to_string(), sonnet);
    table.insert("claude-sonnet-4-20250514".to_string(), sonnet);
    table.insert("claude-sonnet-4-5".to_string(), sonnet);
    table.insert("claude-3-7-sonnet-20250219".to_string(), sonnet);

    // Haiku family
    let haiku = ModelPrice::new(0.80, 4.0).with_cache(1.0, 0.08);
    table.insert("claude-haiku-4-5-20251001".to_string(), haiku);
    table.insert("claude-haiku-4-5".to_string(), haiku);
    table.insert("claude-3-5-haiku-20241022".to_string(), haiku);

    table
}
