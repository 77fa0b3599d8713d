//! Configuration for the tally binary.
//!
//! An optional YAML file at `~/.tally/config.yaml` supplies defaults; CLI
//! flags override individual fields. Everything has a sensible built-in
//! default so a fresh install runs with no config at all.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use tally_core::{logging::tally_home, CostMode};

/// Pricing subsystem tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    /// Catalog time-to-live in hours
    pub ttl_hours: i64,

    /// Minimum seconds between unknown-model fetch attempts
    pub cooldown_secs: u64,

    /// Refresh interval in seconds while no models are pending
    pub refresh_interval_secs: u64,

    /// Floor in seconds for the fast refresh interval
    pub min_fast_interval_secs: u64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            ttl_hours: 4,
            cooldown_secs: 60,
            refresh_interval_secs: 4 * 60 * 60,
            min_fast_interval_secs: 1,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Database location; defaults to `~/.tally/tally.db`
    pub db_path: Option<PathBuf>,

    /// Telemetry directory overriding the defaults (also settable via the
    /// TALLY_LOG_DIR environment variable)
    pub telemetry_dir: Option<PathBuf>,

    /// Extra telemetry roots watched in addition to the defaults
    pub extra_roots: Vec<PathBuf>,

    /// Cost resolution policy at ingestion
    pub cost_mode: CostMode,

    /// Quiescence window for the file watcher, in milliseconds
    pub debounce_ms: u64,

    /// Pricing tuning
    pub pricing: PricingSettings,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            telemetry_dir: None,
            extra_roots: Vec::new(),
            cost_mode: CostMode::Auto,
            debounce_ms: 500,
            pricing: PricingSettings::default(),
        }
    }
}

impl TallyConfig {
    /// Load configuration.
    ///
    /// An explicitly passed path must exist; the default location is
    /// optional and silently falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match tally_home() {
                Ok(home) => (home.join("config.yaml"), false),
                Err(_) => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Resolved database path.
    pub fn db_path(&self) -> anyhow::Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(tally_home()?.join("tally.db")),
        }
    }

    /// Telemetry roots to watch and scan.
    pub fn telemetry_roots(&self) -> Vec<PathBuf> {
        if let Some(dir) = &self.telemetry_dir {
            return vec![dir.clone()];
        }
        tally_ingest::telemetry_roots(&self.extra_roots)
    }
}
