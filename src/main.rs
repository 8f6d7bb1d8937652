// =============================================================================
// Meridian FX Regime Engine — Main Entry Point
// =============================================================================
//
// Three ways to drive the regime pipeline:
//
//   stream    — replay bars through the streaming detector and print
//               window transitions as `OPEN,<iso>,<label>` /
//               `CLOSE,<iso>,<label>` lines
//   indicator — emit the per-bar regime indicator frame as CSV
//   calibrate — sweep a parameter grid and summarise window statistics
//
// Logs go to stderr; stdout belongs to the data output.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod artifacts;
mod calibrate;
mod market_data;
mod regime;
mod runtime_config;
mod types;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::artifacts::{HmmArtifact, NaiveBayesArtifact};
use crate::calibrate::CalibrationGrid;
use crate::regime::detector::RegimeStreamingDetector;
use crate::regime::indicator::{build_regime_indicator, write_indicator_csv};
use crate::runtime_config::RuntimeConfig;
use crate::types::Bar;

// ── CLI surface ──────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "meridian-regime", version, about = "Online FX regime detection")]
struct Cli {
    /// Runtime config file providing baseline parameters.
    #[arg(long, default_value = "runtime_config.json")]
    config: PathBuf,

    /// Persist the effective parameters (config + CLI overrides) back to
    /// the config file before running.
    #[arg(long)]
    save_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay bars through the streaming detector, printing window events.
    Stream {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        detector: DetectorArgs,
    },
    /// Build the per-bar regime indicator frame and write it as CSV.
    Indicator {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        detector: DetectorArgs,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Sweep a parameter grid and print per-combination window statistics.
    Calibrate {
        #[command(flatten)]
        data: DataArgs,
        /// HMM artifact (JSON) path.
        #[arg(long, default_value = "artifacts/eurusd_hmm.json")]
        hmm_path: PathBuf,
        /// Candidate DC thresholds in percent.
        #[arg(long, default_value = "0.3,0.4,0.5")]
        dc_list: String,
        /// Candidate open thresholds.
        #[arg(long, default_value = "0.75,0.80,0.85")]
        open_list: String,
        /// Candidate close thresholds.
        #[arg(long, default_value = "0.45,0.50,0.55,0.60")]
        close_list: String,
        /// Candidate confirm_open counts.
        #[arg(long, default_value = "1,2,3")]
        k_list: String,
        /// Candidate confirm_close counts.
        #[arg(long, default_value = "1,2,3")]
        kout_list: String,
        /// Candidate min_trends counts.
        #[arg(long, default_value = "1,2,3")]
        lmin_list: String,
    },
}

/// Where the bars come from.
#[derive(Args)]
struct DataArgs {
    /// Instrument symbol; falls back to the config file.
    #[arg(long)]
    symbol: Option<String>,

    /// Bar granularity (e.g. "D"); falls back to the config file.
    #[arg(long)]
    granularity: Option<String>,

    /// Inclusive start date (YYYY-MM-DD) for the service query.
    #[arg(long)]
    start: Option<String>,

    /// Inclusive end date (YYYY-MM-DD) for the service query.
    #[arg(long)]
    end: Option<String>,

    /// Read bars from a local CSV file instead of the data service.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Base URL of the market-data service.
    #[arg(long, env = "MERIDIAN_DATA_URL")]
    data_url: Option<String>,
}

/// Detector parameter overrides; anything omitted falls back to the config.
#[derive(Args)]
struct DetectorArgs {
    /// DC reversal threshold in percent.
    #[arg(long)]
    dc_theta_pct: Option<f64>,

    /// p(regime2) required for a qualifying OPEN tick.
    #[arg(long)]
    theta_open: Option<f64>,

    /// p(regime2) at or below which a CLOSE tick qualifies.
    #[arg(long)]
    theta_close: Option<f64>,

    /// Qualifying DC ticks required to OPEN.
    #[arg(long)]
    k: Option<u32>,

    /// Qualifying DC ticks required to CLOSE.
    #[arg(long)]
    k_out: Option<u32>,

    /// Minimum in-window DC trends before CLOSE is allowed.
    #[arg(long)]
    l_min: Option<u32>,

    /// HMM artifact (JSON) path.
    #[arg(long, default_value = "artifacts/eurusd_hmm.json")]
    hmm_path: PathBuf,

    /// Naive-Bayes artifact (JSON) path.
    #[arg(long)]
    nb_path: Option<PathBuf>,

    /// Score with the Naive-Bayes event classifier instead of the HMM.
    #[arg(long)]
    use_bayes: bool,
}

impl DetectorArgs {
    /// Fold CLI overrides into the baseline config.
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = self.dc_theta_pct {
            config.dc_theta_pct = v;
        }
        if let Some(v) = self.theta_open {
            config.theta_open = v;
        }
        if let Some(v) = self.theta_close {
            config.theta_close = v;
        }
        if let Some(v) = self.k {
            config.confirm_open = v;
        }
        if let Some(v) = self.k_out {
            config.confirm_close = v;
        }
        if let Some(v) = self.l_min {
            config.min_trends = v;
        }
        if self.use_bayes {
            config.use_bayes = true;
        }
    }
}

impl DataArgs {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = &self.symbol {
            config.symbol = v.clone();
        }
        if let Some(v) = &self.granularity {
            config.granularity = v.clone();
        }
        if let Some(v) = &self.data_url {
            config.data_url = v.clone();
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = RuntimeConfig::load(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    match cli.command {
        Command::Stream { data, detector } => {
            data.apply(&mut config);
            detector.apply(&mut config);
            config.validate()?;
            if cli.save_config {
                config.save(&cli.config)?;
            }
            run_stream(config, data, detector).await
        }
        Command::Indicator {
            data,
            detector,
            out,
        } => {
            data.apply(&mut config);
            detector.apply(&mut config);
            config.validate()?;
            if cli.save_config {
                config.save(&cli.config)?;
            }
            run_indicator(config, data, detector, out).await
        }
        Command::Calibrate {
            data,
            hmm_path,
            dc_list,
            open_list,
            close_list,
            k_list,
            kout_list,
            lmin_list,
        } => {
            data.apply(&mut config);
            if cli.save_config {
                config.save(&cli.config)?;
            }
            let grid = CalibrationGrid {
                dc_theta_pct: calibrate::parse_list(&dc_list)?,
                open_p: calibrate::parse_list(&open_list)?,
                close_p: calibrate::parse_list(&close_list)?,
                confirm_open: calibrate::parse_list(&k_list)?,
                confirm_close: calibrate::parse_list(&kout_list)?,
                min_trends: calibrate::parse_list(&lmin_list)?,
            };
            run_calibrate(config, data, hmm_path, grid).await
        }
    }
}

// ── Subcommand drivers ───────────────────────────────────────────────────────

/// Load bars from the CSV file when given, otherwise from the data service.
async fn load_bars(config: &RuntimeConfig, data: &DataArgs) -> Result<Vec<Bar>> {
    match &data.csv {
        Some(path) => market_data::load_bars_csv(path),
        None => {
            market_data::fetch_bars(
                &config.data_url,
                &config.symbol,
                &config.granularity,
                data.start.as_deref(),
                data.end.as_deref(),
            )
            .await
        }
    }
}

async fn run_stream(config: RuntimeConfig, data: DataArgs, detector: DetectorArgs) -> Result<()> {
    let hmm = HmmArtifact::load(&detector.hmm_path)?;
    let bayes = match (&detector.nb_path, config.use_bayes) {
        (Some(path), true) => Some(NaiveBayesArtifact::load(path)?),
        _ => None,
    };

    let bars = load_bars(&config, &data).await?;
    info!(
        symbol = %config.symbol,
        bars = bars.len(),
        use_bayes = config.use_bayes,
        "streaming bars through the detector"
    );

    let mut det = RegimeStreamingDetector::new(
        hmm,
        config.dc_theta_pct,
        config.window_rule(),
        config.rv_window,
        config.use_bayes,
        bayes,
    )?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for bar in &bars {
        let changed = det
            .on_bar(bar)
            .with_context(|| format!("failed to process bar at {}", bar.t))?;
        for w in &changed {
            match w.end {
                None => writeln!(out, "OPEN,{},{}", w.start.to_rfc3339(), w.label)?,
                Some(end) => writeln!(out, "CLOSE,{},{}", end.to_rfc3339(), w.label)?,
            }
        }
        if !changed.is_empty() {
            out.flush()?;
        }
    }

    if let Some(w) = det.current_window() {
        info!(start = %w.start, "stream ended with a window still open");
    }
    Ok(())
}

async fn run_indicator(
    config: RuntimeConfig,
    data: DataArgs,
    detector: DetectorArgs,
    out: Option<PathBuf>,
) -> Result<()> {
    let hmm = HmmArtifact::load(&detector.hmm_path)?;
    let bars = load_bars(&config, &data).await?;
    let close: Vec<_> = bars.iter().map(|b| (b.t, b.close)).collect();

    let rows = build_regime_indicator(
        &close,
        hmm,
        config.window_rule(),
        config.dc_theta_pct,
        config.rv_window,
    )?;
    info!(rows = rows.len(), "indicator frame built");

    match out {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_indicator_csv(&rows, file)?;
            info!(path = %path.display(), "indicator frame written");
        }
        None => write_indicator_csv(&rows, std::io::stdout().lock())?,
    }
    Ok(())
}

async fn run_calibrate(
    config: RuntimeConfig,
    data: DataArgs,
    hmm_path: PathBuf,
    grid: CalibrationGrid,
) -> Result<()> {
    let hmm = HmmArtifact::load(&hmm_path)?;
    let bars = load_bars(&config, &data).await?;
    let close: Vec<_> = bars.iter().map(|b| (b.t, b.close)).collect();

    let rows = calibrate::run_grid(&close, &hmm, &grid, config.rv_window)?;
    calibrate::write_calibration_csv(&rows, std::io::stdout().lock())?;
    Ok(())
}
