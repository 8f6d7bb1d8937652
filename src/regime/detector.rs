// =============================================================================
// Streaming Regime Detector
// =============================================================================
//
// Binds the DC extractor, the probability scorer and the window machine
// into the live path: one bar in, zero-or-more window events out.
//
// Two scoring paths share the pipeline:
//   - HMM:   every bar builds a feature row and advances the forward
//            recursion; the window machine sees p_state1.
//   - Bayes: only event-bearing bars are scored (the classifier consumes
//            per-event statistics); non-event bars reuse the cached value.
//
// Either way the window machine only runs on DC-event ticks, so the
// confirmation cadence is event-driven, not bar-driven.
//
// The detector is strictly sequential and owns all of its state; drive one
// instance per instrument from a single task.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::artifacts::{HmmArtifact, NaiveBayesArtifact};
use crate::regime::bayes::NaiveBayesTracker;
use crate::regime::dc::{DcEvent, DcUpdater};
use crate::regime::features::FeatureBuilder;
use crate::regime::hmm::HmmTracker;
use crate::regime::windows::{Window, WindowRule, WindowStateMachine};
use crate::types::Bar;

/// The probability source feeding the window machine.
enum Scorer {
    Hmm {
        features: FeatureBuilder,
        tracker: HmmTracker,
    },
    Bayes {
        tracker: NaiveBayesTracker,
        last_p1: f64,
    },
}

impl Scorer {
    /// Produce this bar's `p_regime2` given the bar and its DC events.
    fn score(&mut self, bar: &Bar, dc_events: &[DcEvent]) -> f64 {
        match self {
            Self::Hmm { features, tracker } => {
                let row = features.on_bar(bar);
                tracker.score_step(&row).p_state1
            }
            Self::Bayes { tracker, last_p1 } => {
                if let Some(ev) = dc_events.last() {
                    let score = tracker.score_step(ev.tmv, ev.tlen as f64);
                    *last_p1 = score.p_regime2;
                }
                *last_p1
            }
        }
    }
}

/// Online regime detector over a single bar stream.
pub struct RegimeStreamingDetector {
    dc: DcUpdater,
    scorer: Scorer,
    windows: WindowStateMachine,
    last_t: Option<DateTime<Utc>>,
}

impl RegimeStreamingDetector {
    /// Construct the detector from its model artifacts.
    ///
    /// `use_bayes` switches to the Naive-Bayes path; if the blob is absent
    /// the detector falls back to the HMM path rather than fail.
    pub fn new(
        hmm: HmmArtifact,
        dc_theta_pct: f64,
        rule: WindowRule,
        rv_window: usize,
        use_bayes: bool,
        bayes: Option<NaiveBayesArtifact>,
    ) -> Result<Self> {
        if !(dc_theta_pct > 0.0) {
            bail!("dc_theta_pct must be positive, got {dc_theta_pct}");
        }

        let scorer = match (use_bayes, bayes) {
            (true, Some(blob)) => Scorer::Bayes {
                tracker: NaiveBayesTracker::new(blob),
                last_p1: f64::NAN,
            },
            (true, None) => {
                warn!("Bayes path requested without an artifact — falling back to HMM scoring");
                let (model, scaler) = hmm.into_parts();
                Scorer::Hmm {
                    features: FeatureBuilder::new(rv_window),
                    tracker: HmmTracker::new(model, scaler),
                }
            }
            (false, _) => {
                let (model, scaler) = hmm.into_parts();
                Scorer::Hmm {
                    features: FeatureBuilder::new(rv_window),
                    tracker: HmmTracker::new(model, scaler),
                }
            }
        };

        Ok(Self {
            dc: DcUpdater::new(dc_theta_pct),
            scorer,
            windows: WindowStateMachine::new(rule),
            last_t: None,
        })
    }

    /// Feed one bar; returns the windows opened or closed on this tick.
    ///
    /// Timestamps must be strictly increasing — a stale or duplicate bar is
    /// a caller bug and surfaces as an error.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<Vec<Window>> {
        if let Some(last) = self.last_t {
            if bar.t <= last {
                bail!(
                    "non-monotonic bar timestamp: {} follows {}",
                    bar.t,
                    last
                );
            }
        }
        self.last_t = Some(bar.t);

        let dc_events = if bar.has_valid_close() {
            self.dc.update(bar.t, bar.close)
        } else {
            debug!(t = %bar.t, "skipping DC update for non-finite close");
            Vec::new()
        };
        if !dc_events.is_empty() {
            debug!(
                t = %bar.t,
                direction = ?self.dc.direction(),
                "DC event tick"
            );
        }

        let p1 = self.scorer.score(bar, &dc_events);

        let mut changed = Vec::new();
        if !dc_events.is_empty() && p1.is_finite() {
            for _ in &dc_events {
                changed.extend(self.windows.on_prob(bar.t, p1, true));
            }
        }
        Ok(changed)
    }

    /// The currently active window, if any.
    pub fn current_window(&self) -> Option<&Window> {
        self.windows.current()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ClassCond;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn hmm_artifact() -> HmmArtifact {
        serde_json::from_str(crate::artifacts::tests::sample_hmm_json()).unwrap()
    }

    /// A Bayes blob whose class 1 is centred on long, high-movement trends.
    fn bayes_artifact() -> NaiveBayesArtifact {
        let mut priors = BTreeMap::new();
        priors.insert(0, 0.5);
        priors.insert(1, 0.5);
        let mut cond_params = BTreeMap::new();
        cond_params.insert(
            0,
            ClassCond {
                tmv: (0.001, 0.001),
                tlen: (1.0, 0.5),
            },
        );
        cond_params.insert(
            1,
            ClassCond {
                tmv: (0.03, 0.01),
                tlen: (3.0, 1.0),
            },
        );
        NaiveBayesArtifact {
            priors,
            cond_params,
        }
    }

    fn bar(day: u32, close: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
            + chrono::Duration::days(i64::from(day) - 1);
        Bar::from_close(t, close)
    }

    fn unit_rule() -> WindowRule {
        WindowRule {
            open_p: 0.8,
            close_p: 0.5,
            confirm_open: 1,
            confirm_close: 1,
            min_trends: 1,
        }
    }

    #[test]
    fn rejects_nonpositive_theta() {
        assert!(
            RegimeStreamingDetector::new(hmm_artifact(), 0.0, unit_rule(), 20, false, None).is_err()
        );
        assert!(
            RegimeStreamingDetector::new(hmm_artifact(), -1.0, unit_rule(), 20, false, None).is_err()
        );
    }

    #[test]
    fn rejects_non_monotonic_timestamps() {
        let mut det =
            RegimeStreamingDetector::new(hmm_artifact(), 1.0, unit_rule(), 20, false, None).unwrap();
        det.on_bar(&bar(2, 1.10)).unwrap();
        assert!(det.on_bar(&bar(2, 1.11)).is_err());
        assert!(det.on_bar(&bar(1, 1.11)).is_err());
    }

    #[test]
    fn nan_close_advances_features_but_not_dc() {
        let mut det =
            RegimeStreamingDetector::new(hmm_artifact(), 1.0, unit_rule(), 20, false, None).unwrap();
        det.on_bar(&bar(1, 1.00)).unwrap();
        let changed = det.on_bar(&bar(2, f64::NAN)).unwrap();
        assert!(changed.is_empty());
        // A valid close afterwards is still accepted.
        assert!(det.on_bar(&bar(3, 1.02)).unwrap().is_empty());
    }

    #[test]
    fn bayes_fallback_without_artifact_uses_hmm() {
        let det =
            RegimeStreamingDetector::new(hmm_artifact(), 1.0, unit_rule(), 20, true, None).unwrap();
        assert!(matches!(det.scorer, Scorer::Hmm { .. }));
    }

    #[test]
    fn bayes_path_caches_probability_between_events() {
        let mut det = RegimeStreamingDetector::new(
            hmm_artifact(),
            1.0,
            unit_rule(),
            20,
            true,
            Some(bayes_artifact()),
        )
        .unwrap();

        // Up-trend then reversal at bar 4 produces the first DC event.
        det.on_bar(&bar(1, 100.0)).unwrap();
        det.on_bar(&bar(2, 102.0)).unwrap();
        det.on_bar(&bar(3, 103.0)).unwrap();
        det.on_bar(&bar(4, 101.5)).unwrap();

        let p_after_event = match &det.scorer {
            Scorer::Bayes { last_p1, .. } => *last_p1,
            _ => unreachable!(),
        };
        assert!(p_after_event.is_finite());

        // A quiet bar produces no event and leaves the cache untouched.
        det.on_bar(&bar(5, 101.4)).unwrap();
        let p_after_quiet = match &det.scorer {
            Scorer::Bayes { last_p1, .. } => *last_p1,
            _ => unreachable!(),
        };
        assert!((p_after_event - p_after_quiet).abs() < 1e-15);
    }

    #[test]
    fn determinism_identical_streams_identical_windows() {
        let closes = [
            100.0, 102.0, 103.0, 101.0, 99.0, 101.5, 103.5, 101.0, 100.0, 102.5,
        ];
        let run = || -> Vec<Vec<Window>> {
            let mut det = RegimeStreamingDetector::new(
                hmm_artifact(),
                1.0,
                unit_rule(),
                20,
                true,
                Some(bayes_artifact()),
            )
            .unwrap();
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| det.on_bar(&bar(i as u32 + 1, c)).unwrap())
                .collect()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn open_precedes_close_and_starts_match() {
        let mut det = RegimeStreamingDetector::new(
            hmm_artifact(),
            1.0,
            unit_rule(),
            20,
            true,
            Some(bayes_artifact()),
        )
        .unwrap();

        // A long stream of alternating swings: collect every emitted window
        // and check the pairing invariant.
        let mut closes = Vec::new();
        let mut p = 100.0;
        for i in 0..60 {
            p *= if i % 4 < 2 { 1.012 } else { 0.988 };
            closes.push(p);
        }

        let mut events = Vec::new();
        for (i, &c) in closes.iter().enumerate() {
            events.extend(det.on_bar(&bar(i as u32 + 1, c)).unwrap());
        }

        let mut open_start = None;
        for w in &events {
            if w.is_open() {
                assert!(open_start.is_none(), "OPEN while a window was active");
                open_start = Some(w.start);
            } else {
                assert_eq!(Some(w.start), open_start, "CLOSE start mismatch");
                assert!(w.end.unwrap() >= w.start);
                open_start = None;
            }
        }
    }
}
