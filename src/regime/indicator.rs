// =============================================================================
// Batch Regime Indicator — bar-by-bar replay of the online pipeline
// =============================================================================
//
// Replays a historical close series through the same DC / feature / HMM /
// window components the streaming detector uses and records one row per
// bar. The replay is a deterministic re-run of the online path: feeding the
// same series through `RegimeStreamingDetector` bar-by-bar yields the same
// OPEN/CLOSE ticks.
//
// Row semantics:
//   - `reg_window_id` increments at each OPEN and stays on every row of
//     the window *including the closing row*; it clears afterwards.
//   - `reg_age` is 0 on the OPEN bar and grows by one per subsequent bar
//     while the window is active; the closing row carries its final age.
//   - `dc_*` columns hold the most recently observed event statistics.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifacts::HmmArtifact;
use crate::regime::dc::DcUpdater;
use crate::regime::features::FeatureBuilder;
use crate::regime::hmm::HmmTracker;
use crate::regime::windows::{WindowRule, WindowStateMachine};
use crate::types::Bar;

/// One row of the indicator frame, timestamped at its bar.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorRow {
    pub t: DateTime<Utc>,
    /// MAP state under the HMM posterior; empty while undefined.
    pub reg_state: Option<u8>,
    pub reg_p0: f64,
    pub reg_p1: f64,
    pub reg_open: u8,
    pub reg_close: u8,
    pub reg_window_id: Option<u64>,
    pub reg_age: u64,
    pub reg_conf: f64,
    pub dc_tmv: f64,
    pub dc_tlen: Option<u32>,
    pub dc_r: f64,
    pub dc_event_bar: u8,
}

/// Replay `close` through the online pipeline and emit one row per bar.
///
/// The series must be strictly increasing in time (sorted input with
/// duplicates removed is the loader's job; violations are caller bugs).
pub fn build_regime_indicator(
    close: &[(DateTime<Utc>, f64)],
    hmm: HmmArtifact,
    rule: WindowRule,
    dc_theta_pct: f64,
    rv_window: usize,
) -> Result<Vec<IndicatorRow>> {
    if !(dc_theta_pct > 0.0) {
        bail!("dc_theta_pct must be positive, got {dc_theta_pct}");
    }

    let (model, scaler) = hmm.into_parts();
    let mut dc = DcUpdater::new(dc_theta_pct);
    let mut features = FeatureBuilder::new(rv_window);
    let mut tracker = HmmTracker::new(model, scaler);
    let mut sm = WindowStateMachine::new(rule);

    let mut rows = Vec::with_capacity(close.len());
    let mut last_t: Option<DateTime<Utc>> = None;
    let mut window_id: Option<u64> = None;
    let mut age: u64 = 0;
    let mut last_dc_tmv = f64::NAN;
    let mut last_dc_tlen: Option<u32> = None;
    let mut last_dc_r = f64::NAN;

    for &(t, price) in close {
        if let Some(last) = last_t {
            if t <= last {
                bail!("non-monotonic timestamp in close series: {t} follows {last}");
            }
        }
        last_t = Some(t);

        let bar = Bar::from_close(t, price);
        let dc_events = if bar.has_valid_close() {
            dc.update(t, price)
        } else {
            Vec::new()
        };

        let feat = features.on_bar(&bar);
        let post = tracker.score_step(&feat);

        let mut changed = Vec::new();
        if !dc_events.is_empty() && post.p_state1.is_finite() {
            for ev in &dc_events {
                last_dc_tmv = ev.tmv;
                last_dc_tlen = Some(ev.tlen);
                last_dc_r = ev.r;
                changed.extend(sm.on_prob(t, post.p_state1, true));
            }
        }

        let mut reg_open = 0u8;
        let mut reg_close = 0u8;
        let mut closed_this_bar = false;
        for w in &changed {
            if w.is_open() {
                reg_open = 1;
                window_id = Some(window_id.map_or(1, |id| id + 1));
                age = 0;
            } else {
                reg_close = 1;
                closed_this_bar = true;
            }
        }

        rows.push(IndicatorRow {
            t,
            reg_state: post.map_state,
            reg_p0: post.p_state0,
            reg_p1: post.p_state1,
            reg_open,
            reg_close,
            reg_window_id: window_id,
            reg_age: if window_id.is_some() { age } else { 0 },
            reg_conf: post.confidence(),
            dc_tmv: last_dc_tmv,
            dc_tlen: last_dc_tlen,
            dc_r: last_dc_r,
            dc_event_bar: u8::from(!dc_events.is_empty()),
        });

        // The closing row keeps its id and age; clear only afterwards.
        if closed_this_bar {
            window_id = None;
            age = 0;
        } else if window_id.is_some() && reg_open == 0 {
            age += 1;
        }
    }

    Ok(rows)
}

/// Render the indicator frame as CSV to `writer`.
pub fn write_indicator_csv<W: std::io::Write>(rows: &[IndicatorRow], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
