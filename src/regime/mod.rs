// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Online market-regime detection over a bar stream:
// - Directional-change event extraction (trend reversals of size theta)
// - Per-bar features (log-return, 20-day realized volatility)
// - 2-state HMM posterior tracking / Gaussian Naive-Bayes event scoring
// - Confirmation-gated regime windows
// - Batch replay producing a per-bar indicator frame

pub mod bayes;
pub mod dc;
pub mod detector;
pub mod features;
pub mod hmm;
pub mod indicator;
pub mod windows;

pub use dc::{DcEvent, DcUpdater};
pub use detector::RegimeStreamingDetector;
pub use indicator::{build_regime_indicator, IndicatorRow};
pub use windows::{Window, WindowRule, WindowStateMachine};
