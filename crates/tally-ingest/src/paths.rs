//! Telemetry root discovery.
//!
//! Both coding-assistant data directories are watched:
//! `~/.claude/projects` and `~/.config/claude/projects`. The
//! `TALLY_LOG_DIR` environment variable replaces the defaults when set,
//! and config may add extra roots.

use std::path::PathBuf;

use tracing::debug;
use walkdir::WalkDir;

/// Environment variable overriding the default telemetry roots.
pub const TELEMETRY_DIR_ENV: &str = "TALLY_LOG_DIR";

/// Resolve the telemetry roots to watch and scan.
pub fn telemetry_roots(extra: &[PathBuf]) -> Vec<PathBuf> {
    if let Ok(dir) = std::env::var(TELEMETRY_DIR_ENV) {
        if !dir.is_empty() {
            debug!(dir, "telemetry root overridden by environment");
            return vec![PathBuf::from(dir)];
        }
    }

    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".claude").join("projects"));
        roots.push(home.join(".config").join("claude").join("projects"));
    }
    roots.extend_from_slice(extra);
    roots
}

/// Recursively collect every `.jsonl` file under the given roots, sorted
/// and deduplicated. Missing roots are silently skipped.
pub fn discover_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "jsonl")
            {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    files
}
