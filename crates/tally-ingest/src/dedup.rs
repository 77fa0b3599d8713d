//! Batch-local deduplication.
//!
//! Within one parsed batch the first occurrence of an identity hash wins and
//! later duplicates are dropped. Unhashable records always pass; the at-rest
//! layer lives in the persistence gateway's idempotent upsert.

use std::collections::HashSet;

use tracing::debug;

use tally_core::UsageRecord;

/// Drop later duplicates of the same identity hash, first occurrence wins.
///
/// Returns the surviving records in input order and the number dropped.
pub fn dedup_batch(records: Vec<UsageRecord>) -> (Vec<UsageRecord>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        match record.identity_hash() {
            Some(hash) => {
                if seen.insert(hash) {
                    kept.push(record);
                } else {
                    dropped += 1;
                }
            }
            None => kept.push(record),
        }
    }

    if dropped > 0 {
        debug!(dropped, kept = kept.len(), "dropped batch-local duplicates");
    }

    (kept, dropped)
}
