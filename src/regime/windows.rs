// =============================================================================
// Regime Window State Machine — confirmation-gated OPEN/CLOSE
// =============================================================================
//
// Converts a stream of `(timestamp, p_regime2, dc_event)` triples into
// at-most-once OPEN and CLOSE events for labeled windows.
//
//   IDLE   --(confirm_open qualifying DC ticks)-->  ACTIVE   (emits OPEN)
//   ACTIVE --(confirm_close qualifying DC ticks
//             and trend_count >= min_trends)-->     IDLE     (emits CLOSE)
//
// Counters only advance on DC-event ticks; probability updates between
// events never move the machine. The OPEN timestamp is the *first*
// qualifying tick of the streak, the CLOSE timestamp is the confirming
// tick. NaN probabilities qualify for neither side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Label attached to every emitted window.
pub const WINDOW_LABEL: &str = "regime_2";

/// Thresholds and confirmation counts for window transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowRule {
    /// p(regime2) at or above which a DC tick qualifies toward OPEN.
    pub open_p: f64,
    /// p(regime2) at or below which a DC tick qualifies toward CLOSE.
    pub close_p: f64,
    /// Qualifying ticks required to OPEN.
    pub confirm_open: u32,
    /// Qualifying ticks required to CLOSE.
    pub confirm_close: u32,
    /// Minimum DC trends observed while active before CLOSE is allowed.
    pub min_trends: u32,
}

impl Default for WindowRule {
    fn default() -> Self {
        Self {
            open_p: 0.80,
            close_p: 0.50,
            confirm_open: 2,
            confirm_close: 2,
            min_trends: 2,
        }
    }
}

/// A regime window. `end == None` means the window is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub label: String,
}

impl Window {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Confirmation state machine. At most one window is active at a time.
pub struct WindowStateMachine {
    rule: WindowRule,
    current: Option<Window>,
    open_streak: u32,
    close_streak: u32,
    trend_count: u32,
    pending_open_time: Option<DateTime<Utc>>,
}

impl WindowStateMachine {
    pub fn new(rule: WindowRule) -> Self {
        Self {
            rule,
            current: None,
            open_streak: 0,
            close_streak: 0,
            trend_count: 0,
            pending_open_time: None,
        }
    }

    /// The currently active window, if any.
    pub fn current(&self) -> Option<&Window> {
        self.current.as_ref()
    }

    /// Drop any active window and zero every counter.
    pub fn reset(&mut self) {
        self.current = None;
        self.open_streak = 0;
        self.close_streak = 0;
        self.trend_count = 0;
        self.pending_open_time = None;
    }

    /// Feed one tick. Returns the windows that changed state on this tick,
    /// in the order the transitions occurred.
    pub fn on_prob(&mut self, t: DateTime<Utc>, p_regime2: f64, dc_event: bool) -> Vec<Window> {
        let mut changed = Vec::new();
        if !dc_event {
            return changed;
        }

        if self.current.is_none() {
            // IDLE: count qualifying ticks toward an OPEN.
            if p_regime2 >= self.rule.open_p {
                if self.open_streak == 0 {
                    self.pending_open_time = Some(t);
                }
                self.open_streak += 1;
            } else {
                self.open_streak = 0;
                self.pending_open_time = None;
            }

            if self.open_streak >= self.rule.confirm_open {
                let start = self.pending_open_time.unwrap_or(t);
                let window = Window {
                    start,
                    end: None,
                    label: WINDOW_LABEL.to_string(),
                };
                debug!(start = %start, confirmed_at = %t, "regime window opened");
                self.current = Some(window.clone());
                changed.push(window);
                self.open_streak = 0;
                self.close_streak = 0;
                self.trend_count = 0;
                self.pending_open_time = None;
            }
            return changed;
        }

        // ACTIVE: every DC tick counts as one trend; qualifying ticks count
        // toward a CLOSE.
        self.trend_count += 1;
        if p_regime2 <= self.rule.close_p {
            self.close_streak += 1;
        } else {
            self.close_streak = 0;
        }

        if self.close_streak >= self.rule.confirm_close && self.trend_count >= self.rule.min_trends
        {
            let open = self.current.take().expect("active window checked above");
            let closed = Window {
                start: open.start,
                end: Some(t),
                label: open.label,
            };
            debug!(start = %closed.start, end = %t, "regime window closed");
            changed.push(closed);
            self.open_streak = 0;
            self.close_streak = 0;
            self.trend_count = 0;
            self.pending_open_time = None;
        }

        changed
    }
}
