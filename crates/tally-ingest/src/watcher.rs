//! Debounced file watching over the telemetry roots.
//!
//! Appends to session logs arrive in rapid bursts; a quiescence window
//! (default 500 ms) coalesces them so files are not read mid-write. Batches
//! of changed `.jsonl` paths are delivered over a tokio mpsc channel to the
//! ingest pipeline.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{IngestError, Result};

/// Default quiescence window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default channel buffer size for change batches.
pub const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Configuration for the log watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Telemetry roots to watch recursively
    pub roots: Vec<PathBuf>,

    /// Quiescence window for coalescing rapid changes
    pub debounce: Duration,

    /// Channel buffer size for change batches
    pub channel_buffer: usize,
}

impl WatcherConfig {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer = size;
        self
    }
}

/// Debounced watcher emitting batches of changed telemetry files.
pub struct LogWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    roots: Vec<PathBuf>,
}

impl LogWatcher {
    /// Start watching and return the watcher plus the change-batch channel.
    ///
    /// Roots that do not exist yet are skipped with a warning; the watcher
    /// stays alive as long as the returned value is held.
    pub fn spawn(config: WatcherConfig) -> Result<(Self, mpsc::Receiver<Vec<PathBuf>>)> {
        let (tx, rx) = mpsc::channel(config.channel_buffer);

        let debouncer = new_debouncer(
            config.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let mut seen = HashSet::new();
                    let mut changed = Vec::new();
                    for event in events {
                        if !matches!(
                            event.event.kind,
                            EventKind::Create(_) | EventKind::Modify(_)
                        ) {
                            continue;
                        }
                        for path in &event.event.paths {
                            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                                continue;
                            }
                            if seen.insert(path.clone()) {
                                changed.push(path.clone());
                            }
                        }
                    }
                    if changed.is_empty() {
                        return;
                    }
                    debug!(files = changed.len(), "telemetry change batch");
                    if tx.blocking_send(changed).is_err() {
                        warn!("change channel closed, dropping batch");
                    }
                }
                Err(errors) => {
                    for err in errors {
                        error!(error = ?err, "file watcher error");
                    }
                }
            },
        )
        .map_err(|e| IngestError::WatcherInit {
            message: format!("failed to create debouncer: {e}"),
        })?;

        let mut debouncer = debouncer;
        let mut watching = 0;
        for root in &config.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "telemetry root missing, not watched");
                continue;
            }
            debouncer
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| IngestError::WatcherInit {
                    message: format!("failed to watch {}: {e}", root.display()),
                })?;
            info!(root = %root.display(), "watching telemetry root");
            watching += 1;
        }

        if watching == 0 {
            warn!("no telemetry roots exist yet, watcher is idle");
        }

        Ok((
            Self {
                _debouncer: debouncer,
                roots: config.roots,
            },
            rx,
        ))
    }

    /// The configured telemetry roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}
