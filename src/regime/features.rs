// =============================================================================
// Per-Bar Feature Builder — log-return and 20-day realized volatility
// =============================================================================
//
// Consumes bars and produces the two features the HMM was trained on:
//
//   ret    = ln(close_t / close_{t-1})
//   rv_20d = population std of the last <= 20 log-returns, annualised
//            with sqrt(252)
//
// NaN marks an undefined feature: ret on the first bar (or across a gap),
// rv_20d until at least half the window has filled.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::types::Bar;

/// Annualisation factor for daily bars.
const ANNUALISATION: f64 = 252.0;

/// One feature observation, timestamped at the source bar.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRow {
    pub t: DateTime<Utc>,
    pub ret: f64,
    pub rv_20d: f64,
}

/// Stateful feature extractor over a close-price stream.
pub struct FeatureBuilder {
    rv_window: usize,
    prev_close: Option<f64>,
    rets: VecDeque<f64>,
}

impl FeatureBuilder {
    pub fn new(rv_window: usize) -> Self {
        Self {
            rv_window,
            prev_close: None,
            rets: VecDeque::with_capacity(rv_window),
        }
    }

    /// Consume one bar and emit its feature row.
    ///
    /// A non-finite close leaves `prev_close` untouched, so the next valid
    /// close computes its return against the last good one.
    pub fn on_bar(&mut self, bar: &Bar) -> FeatureRow {
        let close = bar.close;

        let mut ret = f64::NAN;
        if let Some(prev) = self.prev_close {
            if close.is_finite() && close > 0.0 {
                ret = (close / prev).ln();
            }
        }

        if ret.is_finite() {
            if self.rets.len() == self.rv_window {
                self.rets.pop_front();
            }
            self.rets.push_back(ret);
        }
        if close.is_finite() {
            self.prev_close = Some(close);
        }

        let min_obs = (self.rv_window / 2).max(2);
        let rv_20d = if self.rets.len() >= min_obs {
            population_std(&self.rets) * ANNUALISATION.sqrt()
        } else {
            f64::NAN
        };

        FeatureRow {
            t: bar.t,
            ret,
            rv_20d,
        }
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Population standard deviation (ddof = 0) of the buffered returns.
fn population_std(values: &VecDeque<f64>) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
