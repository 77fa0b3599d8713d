//! Line-delimited JSON telemetry parser.
//!
//! Two accepted record shapes, tried in order:
//! - flat: top-level `timestamp` with nested `message.usage` token counts
//! - typed-log: `type == "assistant"` carrying the same nested usage
//!
//! Typed entries tagged `user`, `summary`, or any other non-assistant type
//! are valid input intentionally discarded. Everything else that fails to
//! decode is counted as malformed and dropped; no parse failure ever crosses
//! the file boundary.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, trace};

use tally_core::{TokenCounts, UsageRecord};

use crate::error::Result;

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    model: String,
    usage: RawUsage,
    id: Option<String>,
}

/// Primary record shape; typed-log assistant entries also satisfy it since
/// the usage payload nests identically.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    timestamp: RawTimestamp,
    message: RawMessage,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "costUSD")]
    cost_usd: Option<f64>,
}

/// Minimal tag probe for lines that did not match the flat shape.
#[derive(Debug, Deserialize)]
struct TypedTag {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// ISO-8601 text (optional fractional seconds) or numeric epoch seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Seconds(f64),
}

/// Outcome of parsing one line.
#[derive(Debug)]
pub enum LineOutcome {
    /// A normalized usage record
    Record(UsageRecord),
    /// Recognized non-usage entry, intentionally discarded
    Skipped,
    /// Unusable line: bad JSON, missing usage, or unparseable timestamp
    Malformed,
}

/// Per-file parse counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub lines: usize,
    pub records: usize,
    pub skipped: usize,
    pub malformed: usize,
    /// Records missing the message/request id pair; these bypass dedup
    pub unhashable: usize,
}

/// Parsed records plus their counters.
#[derive(Debug, Default)]
pub struct FileScan {
    pub records: Vec<UsageRecord>,
    pub stats: FileStats,
}

/// Parse one line of telemetry.
pub fn parse_line(line: &str, source: &str) -> LineOutcome {
    if !line.trim_start().starts_with('{') {
        return LineOutcome::Malformed;
    }

    if let Ok(entry) = serde_json::from_str::<FlatEntry>(line) {
        let Some(ts) = resolve_timestamp(&entry.timestamp) else {
            return LineOutcome::Malformed;
        };

        let record = UsageRecord::new(
            ts,
            entry.message.model,
            TokenCounts {
                input: entry.message.usage.input_tokens,
                output: entry.message.usage.output_tokens,
                cache_creation: entry.message.usage.cache_creation_input_tokens,
                cache_read: entry.message.usage.cache_read_input_tokens,
            },
            source,
        )
        .with_identity(entry.message.id, entry.request_id)
        .with_precalculated_cost(entry.cost_usd);

        let record = match entry.session_id {
            Some(session_id) => record.with_session(session_id),
            None => record,
        };

        return LineOutcome::Record(record);
    }

    match serde_json::from_str::<TypedTag>(line) {
        // An assistant entry that failed the usage decode is unusable; any
        // other tagged entry is a recognized non-usage line.
        Ok(TypedTag { kind: Some(kind) }) if kind != "assistant" => LineOutcome::Skipped,
        _ => LineOutcome::Malformed,
    }
}

/// Parse an entire telemetry file.
///
/// A file with N parseable lines and K malformed lines yields exactly N−K
/// records (minus intentionally skipped entries) and zero raised errors.
pub fn parse_file(path: &Path) -> Result<FileScan> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let source = path.display().to_string();

    let mut scan = FileScan::default();

    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                trace!(line = index + 1, error = %e, "failed to read line");
                scan.stats.malformed += 1;
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        scan.stats.lines += 1;

        match parse_line(&line, &source) {
            LineOutcome::Record(record) => {
                scan.stats.records += 1;
                if record.identity_hash().is_none() {
                    scan.stats.unhashable += 1;
                }
                scan.records.push(record);
            }
            LineOutcome::Skipped => scan.stats.skipped += 1,
            LineOutcome::Malformed => {
                trace!(line = index + 1, "malformed telemetry line");
                scan.stats.malformed += 1;
            }
        }
    }

    debug!(
        file = %source,
        lines = scan.stats.lines,
        records = scan.stats.records,
        skipped = scan.stats.skipped,
        malformed = scan.stats.malformed,
        unhashable = scan.stats.unhashable,
        "parsed telemetry file"
    );

    Ok(scan)
}

fn resolve_timestamp(raw: &RawTimestamp) -> Option<DateTime<Utc>> {
    match raw {
        RawTimestamp::Text(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            // Offset-less ISO-8601, treated as UTC
            if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc));
            }
            None
        }
        RawTimestamp::Seconds(seconds) => {
            let secs = seconds.trunc() as i64;
            let nanos = ((seconds - seconds.trunc()) * 1_000_000_000.0) as u32;
            DateTime::<Utc>::from_timestamp(secs, nanos)
        }
    }
}
