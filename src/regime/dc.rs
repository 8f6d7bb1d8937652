// =============================================================================
// Directional-Change (DC) Event Extractor
// =============================================================================
//
// Tracks the running trend of a price stream and emits an event whenever
// price retraces by at least theta from the extreme of the current trend.
// Each event summarises the trend that just *completed*:
//
//   t    — timestamp at which that trend started (not the reversal tick)
//   r    — signed log-return of the trend, ln(extreme / start) for up-trends
//          and ln(start / extreme) for down-trends (>= 0 once confirmed)
//   tlen — number of bars the trend lasted
//   tmv  — total movement: sum of |ln(p_i / p_{i-1})| across the trend
//
// Callers must feed finite, positive prices with strictly increasing
// timestamps; the streaming detector filters non-finite closes upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trend direction once the first theta-sized move has been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn flip(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

/// A confirmed directional-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcEvent {
    /// Start time of the completed trend.
    pub t: DateTime<Utc>,
    /// Signed log-return of the completed trend.
    pub r: f64,
    /// Bars spent in the completed trend.
    pub tlen: u32,
    /// Total movement accumulated across the completed trend.
    pub tmv: f64,
}

/// Internal updater state. Initialised lazily on the first bar.
#[derive(Debug, Clone)]
struct DcState {
    direction: Option<Direction>,
    extreme_price: f64,
    trend_start_price: f64,
    trend_start_time: DateTime<Utc>,
    bars_in_trend: u32,
    tmv_accum: f64,
    prev_price: f64,
}

/// Stateful directional-change extractor.
///
/// `update` returns at most one event per tick, since only one reversal is
/// possible per price observation.
pub struct DcUpdater {
    theta: f64,
    state: Option<DcState>,
}

impl DcUpdater {
    /// Create an updater with the reversal threshold given in percent
    /// (theta = `theta_pct / 100`). Caller validates `theta_pct > 0`.
    pub fn new(theta_pct: f64) -> Self {
        Self {
            theta: theta_pct / 100.0,
            state: None,
        }
    }

    /// Feed one `(timestamp, price)` observation. Returns the events
    /// confirmed by this tick (currently zero or one).
    pub fn update(&mut self, t: DateTime<Utc>, price: f64) -> Vec<DcEvent> {
        // First bar: seed everything at the observed price with no direction
        // yet. The seed sets prev_price to the same price, so the first
        // accumulation step below adds nothing.
        let s = self.state.get_or_insert_with(|| DcState {
            direction: None,
            extreme_price: price,
            trend_start_price: price,
            trend_start_time: t,
            bars_in_trend: 0,
            tmv_accum: 0.0,
            prev_price: price,
        });

        let mut events = Vec::new();

        if s.prev_price > 0.0 {
            s.tmv_accum += (price / s.prev_price).ln().abs();
        }
        s.prev_price = price;
        s.bars_in_trend += 1;

        let direction = match s.direction {
            None => {
                // Waiting for the first theta-sized move to pick a side.
                let up = price >= s.extreme_price * (1.0 + self.theta);
                let down = price <= s.extreme_price * (1.0 - self.theta);
                if up || down {
                    s.direction = Some(if up { Direction::Up } else { Direction::Down });
                    s.trend_start_price = s.extreme_price;
                    s.trend_start_time = t;
                    s.extreme_price = price;
                    s.bars_in_trend = 1;
                    s.tmv_accum = 0.0;
                }
                return events;
            }
            Some(d) => d,
        };

        // Extend the extreme in the trend direction.
        match direction {
            Direction::Up => {
                if price > s.extreme_price {
                    s.extreme_price = price;
                }
            }
            Direction::Down => {
                if price < s.extreme_price {
                    s.extreme_price = price;
                }
            }
        }

        // Reversal test against the (possibly just-updated) extreme.
        let reversal = match direction {
            Direction::Up => price <= s.extreme_price * (1.0 - self.theta),
            Direction::Down => price >= s.extreme_price * (1.0 + self.theta),
        };

        if reversal {
            let r = match direction {
                Direction::Up => (s.extreme_price / s.trend_start_price).ln(),
                Direction::Down => (s.trend_start_price / s.extreme_price).ln(),
            };
            let event = DcEvent {
                t: s.trend_start_time,
                r,
                tlen: s.bars_in_trend,
                tmv: s.tmv_accum,
            };
            debug!(
                t = %event.t,
                r = format!("{:.6}", event.r),
                tlen = event.tlen,
                tmv = format!("{:.6}", event.tmv),
                "DC reversal confirmed"
            );
            events.push(event);

            // The completed extreme becomes the start of the opposite trend.
            s.direction = Some(direction.flip());
            s.trend_start_price = s.extreme_price;
            s.trend_start_time = t;
            s.extreme_price = price;
            s.bars_in_trend = 1;
            s.tmv_accum = 0.0;
            s.prev_price = price;
        }

        events
    }

    /// Current trend direction, if one has been established.
    pub fn direction(&self) -> Option<Direction> {
        self.state.as_ref().and_then(|s| s.direction)
    }
}
