// =============================================================================
// Gaussian Naive-Bayes Event Classifier
// =============================================================================
//
// Alternative scorer over DC event statistics `(tmv, tlen)`. Each class
// carries a prior and independent Gaussian parameters per feature; the
// log-posterior is
//
//   log P(c | x) ∝ log P(c) + log N(tmv | mu, sigma) + log N(tlen | mu, sigma)
//
// normalized with a max-shift softmax. Class 0 maps to `p_regime1`,
// class 1 to `p_regime2` — the window machine gates on `p_regime2`.
//
// Stateless: every call scores one completed DC event in isolation.

use serde::Serialize;
use statrs::distribution::{Continuous, Normal};

use crate::artifacts::NaiveBayesArtifact;

/// Prior floor applied before taking logs.
const PRIOR_FLOOR: f64 = 1e-12;

/// Class posteriors for one scored event.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BayesScore {
    pub p_regime1: f64,
    pub p_regime2: f64,
}

pub struct NaiveBayesTracker {
    artifact: NaiveBayesArtifact,
}

impl NaiveBayesTracker {
    pub fn new(artifact: NaiveBayesArtifact) -> Self {
        Self { artifact }
    }

    /// Score one DC event. Degenerate parameters (all classes at -inf)
    /// produce NaN posteriors.
    pub fn score_step(&self, tmv: f64, tlen: f64) -> BayesScore {
        let mut lls = [f64::NEG_INFINITY; 2];
        for cls in 0..2u8 {
            let prior = match self.artifact.priors.get(&cls) {
                Some(&p) => p,
                None => continue,
            };
            let (mu_tmv, sd_tmv, mu_tlen, sd_tlen) = match self.artifact.cond_params.get(&cls) {
                Some(c) => (c.tmv.0, c.tmv.1, c.tlen.0, c.tlen.1),
                None => (0.0, 1.0, 0.0, 1.0),
            };
            let mut ll = gauss_ll(tmv, mu_tmv, sd_tmv);
            ll += gauss_ll(tlen, mu_tlen, sd_tlen);
            ll += prior.max(PRIOR_FLOOR).ln();
            lls[cls as usize] = ll;
        }

        let m = lls[0].max(lls[1]);
        if !m.is_finite() {
            return BayesScore {
                p_regime1: f64::NAN,
                p_regime2: f64::NAN,
            };
        }
        let e0 = (lls[0] - m).exp();
        let e1 = (lls[1] - m).exp();
        let z = e0 + e1;
        BayesScore {
            p_regime1: e0 / z,
            p_regime2: e1 / z,
        }
    }
}

/// Gaussian log-likelihood; a non-positive or non-finite sigma makes the
/// feature uninformative in the worst way: -inf.
fn gauss_ll(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 || !sigma.is_finite() {
        return f64::NEG_INFINITY;
    }
    match Normal::new(mu, sigma) {
        Ok(n) => n.ln_pdf(x),
        Err(_) => f64::NEG_INFINITY,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ClassCond;
    use std::collections::BTreeMap;

    fn tracker(p0: f64, p1: f64, c0: ClassCond, c1: ClassCond) -> NaiveBayesTracker {
        let mut priors = BTreeMap::new();
        priors.insert(0, p0);
        priors.insert(1, p1);
        let mut cond_params = BTreeMap::new();
        cond_params.insert(0, c0);
        cond_params.insert(1, c1);
        NaiveBayesTracker::new(NaiveBayesArtifact {
            priors,
            cond_params,
        })
    }

    fn symmetric_tracker() -> NaiveBayesTracker {
        tracker(
            0.5,
            0.5,
            ClassCond {
                tmv: (0.01, 0.005),
                tlen: (10.0, 3.0),
            },
            ClassCond {
                tmv: (0.05, 0.02),
                tlen: (25.0, 8.0),
            },
        )
    }

    #[test]
    fn posteriors_sum_to_one() {
        let nb = symmetric_tracker();
        let s = nb.score_step(0.03, 18.0);
        assert!((s.p_regime1 + s.p_regime2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn event_near_class_one_scores_regime2() {
        let nb = symmetric_tracker();
        let s = nb.score_step(0.05, 25.0);
        assert!(s.p_regime2 > 0.9);
    }

    #[test]
    fn event_near_class_zero_scores_regime1() {
        let nb = symmetric_tracker();
        let s = nb.score_step(0.01, 10.0);
        assert!(s.p_regime1 > 0.9);
    }

    #[test]
    fn prior_shifts_the_posterior() {
        let cond = ClassCond {
            tmv: (0.02, 0.01),
            tlen: (15.0, 5.0),
        };
        let balanced = tracker(0.5, 0.5, cond.clone(), cond.clone());
        let skewed = tracker(0.9, 0.1, cond.clone(), cond);
        // Identical likelihoods, so the posterior equals the prior.
        let b = balanced.score_step(0.02, 15.0);
        let s = skewed.score_step(0.02, 15.0);
        assert!((b.p_regime2 - 0.5).abs() < 1e-12);
        assert!((s.p_regime2 - 0.1).abs() < 1e-9);
    }

    #[test]
    fn zero_sigma_kills_the_class() {
        let nb = tracker(
            0.5,
            0.5,
            ClassCond {
                tmv: (0.01, 0.0),
                tlen: (10.0, 3.0),
            },
            ClassCond {
                tmv: (0.05, 0.02),
                tlen: (25.0, 8.0),
            },
        );
        let s = nb.score_step(0.03, 18.0);
        assert!((s.p_regime2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn all_degenerate_classes_yield_nan() {
        let dead = ClassCond {
            tmv: (0.0, 0.0),
            tlen: (0.0, f64::NAN),
        };
        let nb = tracker(0.5, 0.5, dead.clone(), dead);
        let s = nb.score_step(0.03, 18.0);
        assert!(s.p_regime1.is_nan());
        assert!(s.p_regime2.is_nan());
    }

    #[test]
    fn zero_prior_is_floored_not_panicking() {
        let cond = ClassCond {
            tmv: (0.02, 0.01),
            tlen: (15.0, 5.0),
        };
        let nb = tracker(0.0, 1.0, cond.clone(), cond);
        let s = nb.score_step(0.02, 15.0);
        assert!(s.p_regime2 > 0.999);
        assert!(s.p_regime1.is_finite());
    }
}
