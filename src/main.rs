//! tally - spend tracking for coding-assistant CLI sessions
//!
//! Ingests line-delimited JSON usage telemetry, reconciles costs against a
//! live pricing catalog with tiered fallback, and answers range spend
//! queries.
//!
//! ## Usage
//!
//! ```bash
//! # Watch telemetry roots and keep the spend figure current
//! tally watch
//!
//! # One-shot ingest of all discovered session logs
//! tally scan
//!
//! # Spend report
//! tally summary --since 2026-01-01
//!
//! # Re-derive stored costs from token counts
//! tally recalculate --mode calculate
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod app;
mod config;

use app::App;
use config::TallyConfig;
use tally_core::CostMode;

/// Spend tracking for coding-assistant CLI sessions.
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ~/.tally/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path (defaults to ~/.tally/tally.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory for tally's own log files (defaults to ~/.tally/logs/)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch telemetry roots and ingest continuously (default)
    Watch,

    /// Ingest all discovered telemetry files once and exit
    Scan,

    /// Report spend for a date range
    Summary {
        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// End date (YYYY-MM-DD, exclusive)
        #[arg(long)]
        until: Option<NaiveDate>,
    },

    /// Recompute stored costs in place
    Recalculate {
        /// Cost mode: display, calculate, or auto
        #[arg(long, default_value = "calculate")]
        mode: String,

        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// End date (YYYY-MM-DD, exclusive)
        #[arg(long)]
        until: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match tally_core::init_logging(cli.log_dir.clone(), cli.verbose > 0) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::from(1);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("tally error: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = TallyConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }

    let app = App::build(config)?;

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            info!("starting tally in watch mode");
            app.run_watch().await
        }
        Command::Scan => {
            let report = app.run_scan().await?;
            println!(
                "scanned {} files: {} records ({} inserted, {} updated, {} duplicates, {} malformed lines)",
                report.files,
                report.records,
                report.inserted,
                report.updated,
                report.deduplicated,
                report.malformed,
            );
            Ok(())
        }
        Command::Summary { since, until } => {
            let (start, end) = date_range(since, until);
            let (total, by_model) = app.summary(start, end)?;

            println!("total: ${total:.4}  (pricing: {})", app.pricing_provenance());
            for spend in by_model {
                println!(
                    "  {:<40} ${:>10.4}  ({} records)",
                    spend.model, spend.total_cost_usd, spend.record_count
                );
            }
            Ok(())
        }
        Command::Recalculate { mode, since, until } => {
            let mode: CostMode = mode.parse().map_err(anyhow::Error::msg)?;
            let (start, end) = date_range(since, until);
            let count = app.recalculate(mode, start, end).await?;
            println!("recalculated {count} records");
            Ok(())
        }
    }
}

/// Resolve optional date bounds to a `[start, end)` UTC range.
fn date_range(
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = since
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = until
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_defaults_are_open_ended() {
        let (start, end) = date_range(None, None);
        assert_eq!(start, DateTime::<Utc>::MIN_UTC);
        assert!(end <= Utc::now());
    }

    #[test]
    fn date_range_uses_midnight_bounds() {
        let since = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let until = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let (start, end) = date_range(Some(since), Some(until));

        assert_eq!(start.to_rfc3339(), "2026-01-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-02-01T00:00:00+00:00");
    }
}
