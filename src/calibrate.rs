// =============================================================================
// Parameter-Grid Calibration — window statistics per parameter combination
// =============================================================================
//
// Replays the indicator over the Cartesian product of candidate detector
// parameters and summarises each run: how many windows opened, and the
// mean/median length (in bars) of contiguous active stretches. The output
// is a CSV table for offline inspection; picking the operating point stays
// a human decision.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::artifacts::HmmArtifact;
use crate::regime::indicator::{build_regime_indicator, IndicatorRow};
use crate::regime::windows::WindowRule;

/// Candidate values for every tunable the sweep covers.
#[derive(Debug, Clone)]
pub struct CalibrationGrid {
    pub dc_theta_pct: Vec<f64>,
    pub open_p: Vec<f64>,
    pub close_p: Vec<f64>,
    pub confirm_open: Vec<u32>,
    pub confirm_close: Vec<u32>,
    pub min_trends: Vec<u32>,
}

/// Summary row for one parameter combination.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRow {
    pub dc_theta_pct: f64,
    pub open_p: f64,
    pub close_p: f64,
    pub k: u32,
    pub k_out: u32,
    pub l_min: u32,
    pub windows: u64,
    pub mean_len: f64,
    pub median_len: f64,
}

/// Parse a comma-separated list of values (`"0.3,0.4,0.5"`).
pub fn parse_list<T: std::str::FromStr>(raw: &str) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let values: Vec<T> = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<T>()
                .with_context(|| format!("bad list element: {s}"))
        })
        .collect::<Result<_>>()?;
    if values.is_empty() {
        bail!("empty parameter list: {raw}");
    }
    Ok(values)
}

/// Run the full sweep. One indicator replay per combination.
pub fn run_grid(
    close: &[(DateTime<Utc>, f64)],
    hmm: &HmmArtifact,
    grid: &CalibrationGrid,
    rv_window: usize,
) -> Result<Vec<CalibrationRow>> {
    let total = grid.dc_theta_pct.len()
        * grid.open_p.len()
        * grid.close_p.len()
        * grid.confirm_open.len()
        * grid.confirm_close.len()
        * grid.min_trends.len();
    info!(combinations = total, bars = close.len(), "starting calibration sweep");

    let mut rows = Vec::with_capacity(total);
    for &dc_theta_pct in &grid.dc_theta_pct {
        for &open_p in &grid.open_p {
            for &close_p in &grid.close_p {
                for &k in &grid.confirm_open {
                    for &k_out in &grid.confirm_close {
                        for &l_min in &grid.min_trends {
                            let rule = WindowRule {
                                open_p,
                                close_p,
                                confirm_open: k,
                                confirm_close: k_out,
                                min_trends: l_min,
                            };
                            let indicator = build_regime_indicator(
                                close,
                                hmm.clone(),
                                rule,
                                dc_theta_pct,
                                rv_window,
                            )?;
                            rows.push(summarise(
                                dc_theta_pct,
                                open_p,
                                close_p,
                                k,
                                k_out,
                                l_min,
                                &indicator,
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(rows)
}

fn summarise(
    dc_theta_pct: f64,
    open_p: f64,
    close_p: f64,
    k: u32,
    k_out: u32,
    l_min: u32,
    indicator: &[IndicatorRow],
) -> CalibrationRow {
    let active: Vec<bool> = indicator.iter().map(|r| r.reg_window_id.is_some()).collect();
    let lengths: Vec<usize> = contiguous_segments(&active)
        .into_iter()
        .map(|(_, len)| len)
        .collect();

    let windows = indicator.iter().map(|r| u64::from(r.reg_open)).sum();
    let mean_len = if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
    };
    let median_len = median(&lengths);

    CalibrationRow {
        dc_theta_pct,
        open_p,
        close_p,
        k,
        k_out,
        l_min,
        windows,
        mean_len,
        median_len,
    }
}

/// Runs of consecutive `true` values as `(start_index, length)` pairs.
fn contiguous_segments(active: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &v) in active.iter().enumerate() {
        match (v, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i - s));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, active.len() - s));
    }
    runs
}

fn median(lengths: &[usize]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

/// Render the sweep result as CSV to `writer`.
pub fn write_calibration_csv<W: std::io::Write>(rows: &[CalibrationRow], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn segments_of_empty_input() {
        assert!(contiguous_segments(&[]).is_empty());
    }

    #[test]
    fn segments_single_run() {
        let runs = contiguous_segments(&[false, true, true, true, false]);
        assert_eq!(runs, vec![(1, 3)]);
    }

    #[test]
    fn segments_run_extends_to_end() {
        let runs = contiguous_segments(&[true, false, true, true]);
        assert_eq!(runs, vec![(0, 1), (2, 2)]);
    }

    #[test]
    fn median_odd_and_even() {
        assert!((median(&[3, 1, 2]) - 2.0).abs() < 1e-12);
        assert!((median(&[4, 1, 2, 3]) - 2.5).abs() < 1e-12);
        assert!((median(&[]) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn parse_list_floats_and_ints() {
        let floats: Vec<f64> = parse_list("0.3, 0.4,0.5").unwrap();
        assert_eq!(floats.len(), 3);
        let ints: Vec<u32> = parse_list("1,2,3").unwrap();
        assert_eq!(ints, vec![1, 2, 3]);
        assert!(parse_list::<f64>("").is_err());
        assert!(parse_list::<u32>("1,x").is_err());
    }

    #[test]
    fn grid_produces_one_row_per_combination() {
        let hmm: HmmArtifact =
            serde_json::from_str(crate::artifacts::tests::sample_hmm_json()).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut p = 100.0;
        let close: Vec<_> = (0..30)
            .map(|i| {
                p *= if i % 4 < 2 { 1.012 } else { 0.988 };
                (base + chrono::Duration::days(i), p)
            })
            .collect();

        let grid = CalibrationGrid {
            dc_theta_pct: vec![0.5, 1.0],
            open_p: vec![0.0],
            close_p: vec![2.0],
            confirm_open: vec![1],
            confirm_close: vec![1, 2],
            min_trends: vec![1],
        };
        let rows = run_grid(&close, &hmm, &grid, 20).unwrap();
        assert_eq!(rows.len(), 4);
        for row in &rows {
            assert!(row.mean_len >= 0.0);
            assert!(row.median_len >= 0.0);
        }
    }
}
