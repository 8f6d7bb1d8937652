// =============================================================================
// Model Artifacts — trained HMM parameters, feature scaler, Naive-Bayes blob
// =============================================================================
//
// The engine never fits models; it consumes parameters exported by the
// offline training step as JSON documents and treats them as immutable.
// Mis-shaped artifacts are structural errors and surface immediately at
// load time, before any bar is processed.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Number of latent states in the trained HMM.
pub const N_STATES: usize = 2;
/// Number of observed features (`ret`, `rv_20d`).
pub const N_FEATURES: usize = 2;

/// Tolerance for probability rows summing to one.
const PROB_SUM_TOL: f64 = 1e-6;

// =============================================================================
// HMM model + scaler
// =============================================================================

/// Standardising scaler fitted alongside the HMM: `z = (x - mean) / std`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: [f64; N_FEATURES],
    pub std: [f64; N_FEATURES],
}

impl FeatureScaler {
    pub fn transform(&self, x: [f64; N_FEATURES]) -> [f64; N_FEATURES] {
        let mut z = [0.0; N_FEATURES];
        for i in 0..N_FEATURES {
            z[i] = (x[i] - self.mean[i]) / self.std[i];
        }
        z
    }
}

/// Parameters of a fitted 2-state Gaussian HMM with diagonal covariances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmModel {
    /// Initial state distribution.
    pub start_prob: [f64; N_STATES],
    /// Row-stochastic transition matrix.
    pub transition: [[f64; N_STATES]; N_STATES],
    /// Per-state emission means, `[state][feature]`.
    pub means: [[f64; N_FEATURES]; N_STATES],
    /// Per-state emission variances, `[state][feature]`.
    pub variances: [[f64; N_FEATURES]; N_STATES],
}

/// The `(model, scaler)` pair the detector is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmArtifact {
    pub start_prob: [f64; N_STATES],
    pub transition: [[f64; N_STATES]; N_STATES],
    pub means: [[f64; N_FEATURES]; N_STATES],
    pub variances: [[f64; N_FEATURES]; N_STATES],
    pub scaler: FeatureScaler,
    #[serde(default = "default_feature_cols")]
    pub feature_cols: Vec<String>,
}

fn default_feature_cols() -> Vec<String> {
    vec!["ret".to_string(), "rv_20d".to_string()]
}

impl HmmArtifact {
    /// Load and validate an HMM artifact from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read HMM artifact from {}", path.display()))?;
        let artifact: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse HMM artifact from {}", path.display()))?;
        artifact
            .validate()
            .with_context(|| format!("invalid HMM artifact in {}", path.display()))?;
        info!(path = %path.display(), "HMM artifact loaded");
        Ok(artifact)
    }

    /// Structural validation: probability rows sum to one, variances and
    /// scaler stds are strictly positive and finite.
    pub fn validate(&self) -> Result<()> {
        check_prob_row("start_prob", &self.start_prob)?;
        for (i, row) in self.transition.iter().enumerate() {
            check_prob_row(&format!("transition row {i}"), row)?;
        }
        for (s, row) in self.variances.iter().enumerate() {
            for (f, &v) in row.iter().enumerate() {
                if !v.is_finite() || v <= 0.0 {
                    bail!("variance[{s}][{f}] must be finite and positive, got {v}");
                }
            }
        }
        for (s, row) in self.means.iter().enumerate() {
            for (f, &m) in row.iter().enumerate() {
                if !m.is_finite() {
                    bail!("mean[{s}][{f}] must be finite, got {m}");
                }
            }
        }
        for (f, &s) in self.scaler.std.iter().enumerate() {
            if !s.is_finite() || s <= 0.0 {
                bail!("scaler std[{f}] must be finite and positive, got {s}");
            }
        }
        for (f, &m) in self.scaler.mean.iter().enumerate() {
            if !m.is_finite() {
                bail!("scaler mean[{f}] must be finite, got {m}");
            }
        }
        if self.feature_cols.len() != N_FEATURES {
            bail!(
                "expected {N_FEATURES} feature columns, got {}",
                self.feature_cols.len()
            );
        }
        Ok(())
    }

    /// Split into the model and scaler halves consumed by the tracker.
    pub fn into_parts(self) -> (HmmModel, FeatureScaler) {
        let model = HmmModel {
            start_prob: self.start_prob,
            transition: self.transition,
            means: self.means,
            variances: self.variances,
        };
        (model, self.scaler)
    }
}

fn check_prob_row(name: &str, row: &[f64]) -> Result<()> {
    let mut sum = 0.0;
    for &p in row {
        if !p.is_finite() || p < 0.0 {
            bail!("{name} contains an invalid probability: {p}");
        }
        sum += p;
    }
    if (sum - 1.0).abs() > PROB_SUM_TOL {
        bail!("{name} must sum to 1, got {sum}");
    }
    Ok(())
}

// =============================================================================
// Naive-Bayes artifact
// =============================================================================

/// Per-class Gaussian parameters over the DC event statistics, each stored
/// as `[mu, sigma]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCond {
    pub tmv: (f64, f64),
    pub tlen: (f64, f64),
}

/// The Naive-Bayes JSON blob:
/// `{"priors": {"0": f, "1": f}, "cond_params": {"0": {...}, "1": {...}}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesArtifact {
    pub priors: BTreeMap<u8, f64>,
    pub cond_params: BTreeMap<u8, ClassCond>,
}

impl NaiveBayesArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| {
            format!("failed to read Naive-Bayes artifact from {}", path.display())
        })?;
        let artifact: Self = serde_json::from_str(&content).with_context(|| {
            format!("failed to parse Naive-Bayes artifact from {}", path.display())
        })?;
        artifact
            .validate()
            .with_context(|| format!("invalid Naive-Bayes artifact in {}", path.display()))?;
        info!(path = %path.display(), "Naive-Bayes artifact loaded");
        Ok(artifact)
    }

    /// Both classes must carry a prior and conditional parameters. Sigmas
    /// are deliberately *not* range-checked here: a non-positive sigma is a
    /// scorable degenerate input (its feature contributes -inf), not a
    /// structural error.
    pub fn validate(&self) -> Result<()> {
        for cls in [0u8, 1u8] {
            if !self.priors.contains_key(&cls) {
                bail!("missing prior for class {cls}");
            }
            if !self.cond_params.contains_key(&cls) {
                bail!("missing cond_params for class {cls}");
            }
        }
        for (cls, &p) in &self.priors {
            if !p.is_finite() || p < 0.0 {
                bail!("prior for class {cls} must be finite and non-negative, got {p}");
            }
        }
        Ok(())
    }
}
