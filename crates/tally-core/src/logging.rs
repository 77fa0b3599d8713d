//! Logging infrastructure for tally.
//!
//! Structured logging via the `tracing` ecosystem: a JSON-lines file in
//! `~/.tally/logs/` for machine parsing plus a human-readable console layer
//! on stderr. Ingestion and pricing components attach structured fields
//! (`model`, `source`, `provenance`, ...) rather than formatting them into
//! messages.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{CoreError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the tally logging system.
///
/// Sets up file logging (JSON lines, daily rolling) and console logging to
/// stderr. Returns a [`LogGuard`] that must be held for the application
/// lifetime so pending entries are flushed on shutdown.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| CoreError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "tally.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tally={default_level}")));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Default log directory: `~/.tally/logs/`.
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(tally_home()?.join("logs"))
}

/// Default tally state directory: `~/.tally/`.
pub fn tally_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| CoreError::HomeNotSet)?;
    Ok(PathBuf::from(home).join(".tally"))
}
