// =============================================================================
// Runtime Configuration — detector settings with atomic save
// =============================================================================
//
// Central configuration for the Meridian regime engine. Every field carries
// a serde default so that adding new fields never breaks loading an older
// config file. Persistence uses an atomic tmp + rename pattern to prevent
// corruption on crash.
//
// CLI flags override config-file values; the config file only provides the
// baseline.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::regime::windows::WindowRule;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_granularity() -> String {
    "D".to_string()
}

fn default_data_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_dc_theta_pct() -> f64 {
    0.4
}

fn default_theta_open() -> f64 {
    0.80
}

fn default_theta_close() -> f64 {
    0.50
}

fn default_confirm_open() -> u32 {
    2
}

fn default_confirm_close() -> u32 {
    2
}

fn default_min_trends() -> u32 {
    2
}

fn default_rv_window() -> usize {
    20
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the regime engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Data source ---------------------------------------------------------

    /// Instrument the engine watches.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Bar granularity requested from the data service (e.g. "D").
    #[serde(default = "default_granularity")]
    pub granularity: String,

    /// Base URL of the market-data service.
    #[serde(default = "default_data_url")]
    pub data_url: String,

    // --- Detector parameters -------------------------------------------------

    /// DC reversal threshold in percent (theta = pct / 100).
    #[serde(default = "default_dc_theta_pct")]
    pub dc_theta_pct: f64,

    /// p(regime2) required for a DC tick to qualify toward OPEN.
    #[serde(default = "default_theta_open")]
    pub theta_open: f64,

    /// p(regime2) at or below which a DC tick qualifies toward CLOSE.
    #[serde(default = "default_theta_close")]
    pub theta_close: f64,

    /// Qualifying DC ticks required to OPEN a window.
    #[serde(default = "default_confirm_open")]
    pub confirm_open: u32,

    /// Qualifying DC ticks required to CLOSE a window.
    #[serde(default = "default_confirm_close")]
    pub confirm_close: u32,

    /// Minimum DC trends seen while active before CLOSE is allowed.
    #[serde(default = "default_min_trends")]
    pub min_trends: u32,

    /// Look-back of the realized-volatility feature.
    #[serde(default = "default_rv_window")]
    pub rv_window: usize,

    /// Score with the Naive-Bayes event classifier instead of the HMM.
    #[serde(default)]
    pub use_bayes: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            granularity: default_granularity(),
            data_url: default_data_url(),
            dc_theta_pct: default_dc_theta_pct(),
            theta_open: default_theta_open(),
            theta_close: default_theta_close(),
            confirm_open: default_confirm_open(),
            confirm_close: default_confirm_close(),
            min_trends: default_min_trends(),
            rv_window: default_rv_window(),
            use_bayes: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            dc_theta_pct = config.dc_theta_pct,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Reject parameter values the detector leaves undefined.
    pub fn validate(&self) -> Result<()> {
        if !(self.dc_theta_pct > 0.0) {
            bail!("dc_theta_pct must be positive, got {}", self.dc_theta_pct);
        }
        if self.confirm_open == 0 || self.confirm_close == 0 {
            bail!("confirm_open and confirm_close must be at least 1");
        }
        if self.rv_window < 2 {
            bail!("rv_window must be at least 2, got {}", self.rv_window);
        }
        Ok(())
    }

    /// The window rule implied by the thresholds.
    pub fn window_rule(&self) -> WindowRule {
        WindowRule {
            open_p: self.theta_open,
            close_p: self.theta_close,
            confirm_open: self.confirm_open,
            confirm_close: self.confirm_close,
            min_trends: self.min_trends,
        }
    }
}
