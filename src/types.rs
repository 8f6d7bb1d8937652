// =============================================================================
// Shared types used across the Meridian regime engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn nan() -> f64 {
    f64::NAN
}

/// A single OHLCV price bar.
///
/// Only `t` and `close` are consumed by the regime pipeline; the remaining
/// price fields are accepted so bar sources can hand over full records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub t: DateTime<Utc>,
    #[serde(default = "nan")]
    pub open: f64,
    #[serde(default = "nan")]
    pub high: f64,
    #[serde(default = "nan")]
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Build a bar carrying only a timestamp and close — the fields the
    /// detector actually reads. The batch replay uses this.
    pub fn from_close(t: DateTime<Utc>, close: f64) -> Self {
        Self {
            t,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close,
            volume: 0.0,
        }
    }

    /// Whether the close is usable for a DC update (finite and positive).
    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn from_close_leaves_ohlv_unset() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bar = Bar::from_close(t, 1.08);
        assert!(bar.open.is_nan());
        assert!((bar.close - 1.08).abs() < f64::EPSILON);
        assert!(bar.has_valid_close());
    }

    #[test]
    fn nan_or_nonpositive_close_is_invalid() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert!(!Bar::from_close(t, f64::NAN).has_valid_close());
        assert!(!Bar::from_close(t, 0.0).has_valid_close());
        assert!(!Bar::from_close(t, -1.0).has_valid_close());
    }
}
