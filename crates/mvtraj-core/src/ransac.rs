//! Deterministic RANSAC over any [`Estimator`].
//!
//! A datum is an inlier when its residual is strictly below `thresh`. The
//! best model is replaced only by a candidate with strictly more inliers, so
//! ties keep the first model found. Candidates are scored on the rayon pool.
//!
//! Failure is reported, never panicked on: with fewer data than
//! [`Estimator::MIN_SAMPLES`] the result is empty, and when no candidate
//! reaches `min_inliers` the last evaluated model comes back with
//! `success == false`.

use rand::seq::index;
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Sampling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RansacVariant {
    /// Minimal-sample hypotheses only.
    #[default]
    Vanilla,
    /// After every improvement, refit on the full inlier set and keep the
    /// refit when it does not lose inliers.
    LocalOptimization,
}

/// Settings of one [`ransac_fit`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Cap on minimal-sample draws.
    pub max_iters: usize,
    /// Exclusive inlier bound: a datum is an inlier when its residual is
    /// strictly below `thresh`, in the estimator's units.
    pub thresh: f64,
    /// Consensus size a model needs to count as a success; raised to
    /// [`Estimator::MIN_SAMPLES`] when smaller.
    pub min_inliers: usize,
    /// Early-termination confidence in `[0, 1)`; `0` always runs `max_iters` draws.
    pub confidence: f64,
    /// Seed of the sampling RNG; equal seeds give equal results.
    pub seed: u64,
    /// Plain or locally optimized hypotheses.
    pub variant: RansacVariant,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            thresh: 2.0,
            min_inliers: 8,
            confidence: 0.0,
            seed: 1_234_567,
            variant: RansacVariant::Vanilla,
        }
    }
}

/// Outcome of [`ransac_fit`].
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    /// The returned model reached `min_inliers`.
    pub success: bool,
    /// Best model, or the last evaluated one when `success` is false.
    pub model: Option<M>,
    /// Ascending indices of data with residual strictly below `thresh`.
    pub inliers: Vec<usize>,
    /// One flag per datum; empty when no model was evaluated.
    pub inlier_mask: Vec<bool>,
    /// RMS residual of the inliers.
    pub inlier_rms: f64,
    /// Draws performed.
    pub iters: usize,
}

impl<M> RansacResult<M> {
    fn empty(iters: usize) -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_mask: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters,
        }
    }
}

/// A model family RANSAC can hypothesize and verify.
///
/// Per-problem constants (intrinsics, known scales) travel inside `Datum`.
pub trait Estimator {
    type Datum: Sync;
    type Model: Sync;

    const MIN_SAMPLES: usize;

    /// Model through the given data; `None` when the subset cannot define one.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum, in the units of `thresh`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Fit on a full inlier set; [`Estimator::fit`] unless overridden.
    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        Self::fit(data, inliers)
    }
}

/// Classify every datum against `model`.
fn evaluate<E: Estimator>(
    model: E::Model,
    data: &[E::Datum],
    opts: &RansacOptions,
    min_inliers: usize,
) -> RansacResult<E::Model> {
    let residuals: Vec<f64> = data.par_iter().map(|d| E::residual(&model, d)).collect();
    let inlier_mask: Vec<bool> = residuals.iter().map(|&r| r < opts.thresh).collect();
    let inliers: Vec<usize> = (0..data.len()).filter(|&i| inlier_mask[i]).collect();
    let inlier_rms = match inliers.len() {
        0 => f64::INFINITY,
        n => (inliers.iter().map(|&i| residuals[i].powi(2)).sum::<f64>() / n as f64).sqrt(),
    };
    RansacResult {
        success: inliers.len() >= min_inliers,
        model: Some(model),
        inliers,
        inlier_mask,
        inlier_rms,
        iters: 0,
    }
}

/// Draws needed to hit an all-inlier sample with the given confidence,
/// bounded below by the draws already made.
fn adaptive_iterations(opts: &RansacOptions, inlier_ratio: f64, sample: usize, done: usize) -> usize {
    if opts.confidence <= 0.0 {
        return opts.max_iters;
    }
    let p_good = inlier_ratio.powi(sample as i32);
    if p_good <= 0.0 {
        return opts.max_iters;
    }
    if p_good >= 1.0 {
        return done.min(opts.max_iters);
    }
    let needed = ((1.0 - opts.confidence).ln() / (1.0 - p_good).ln()).ceil();
    if needed.is_finite() {
        (needed as usize).clamp(done, opts.max_iters)
    } else {
        opts.max_iters
    }
}

pub fn ransac_fit<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let k = E::MIN_SAMPLES;
    if k == 0 || data.len() < k {
        return RansacResult::empty(0);
    }
    let min_inliers = opts.min_inliers.max(k);
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut best: Option<RansacResult<E::Model>> = None;
    let mut last: Option<RansacResult<E::Model>> = None;
    let mut budget = opts.max_iters;
    let mut iters = 0;

    while iters < budget {
        iters += 1;
        let sample = index::sample(&mut rng, data.len(), k).into_vec();
        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(model) = E::fit(data, &sample) else {
            continue;
        };

        let candidate = evaluate::<E>(model, data, opts, min_inliers);
        let to_beat = best.as_ref().map_or(0, |b| b.inliers.len());
        if !candidate.success || candidate.inliers.len() <= to_beat {
            if best.is_none() {
                last = Some(candidate);
            }
            continue;
        }

        let count = candidate.inliers.len();
        let candidate = match opts.variant {
            RansacVariant::LocalOptimization => E::refit(data, &candidate.inliers)
                .map(|m| evaluate::<E>(m, data, opts, min_inliers))
                .filter(|r| r.inliers.len() >= count)
                .unwrap_or(candidate),
            RansacVariant::Vanilla => candidate,
        };

        let ratio = candidate.inliers.len() as f64 / data.len() as f64;
        budget = adaptive_iterations(opts, ratio, k, iters);
        best = Some(candidate);
    }

    let mut result = best.or(last).unwrap_or_else(|| RansacResult::empty(0));
    result.iters = iters;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constant pixel shift between matched points of two images.
    struct ShiftEstimator;

    impl Estimator for ShiftEstimator {
        type Datum = ([f64; 2], [f64; 2]);
        type Model = [f64; 2];

        const MIN_SAMPLES: usize = 1;

        fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
            let n = sample_indices.len() as f64;
            let sum = sample_indices.iter().fold([0.0, 0.0], |acc, &i| {
                let (a, b) = data[i];
                [acc[0] + b[0] - a[0], acc[1] + b[1] - a[1]]
            });
            Some([sum[0] / n, sum[1] / n])
        }

        fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
            let (a, b) = datum;
            (b[0] - a[0] - model[0]).hypot(b[1] - a[1] - model[1])
        }
    }

    /// Ten matches shifted by `(3, -1)` with ±0.01 px jitter in x, then
    /// three wrong matches.
    fn matches() -> Vec<([f64; 2], [f64; 2])> {
        let mut data: Vec<_> = (0..10)
            .map(|i| {
                let a = [10.0 * i as f64, 5.0 * i as f64];
                let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
                (a, [a[0] + 3.0 + jitter, a[1] - 1.0])
            })
            .collect();
        data.push(([0.0, 0.0], [40.0, 2.0]));
        data.push(([5.0, 5.0], [-20.0, 9.0]));
        data.push(([7.0, 1.0], [7.0, 30.0]));
        data
    }

    fn opts() -> RansacOptions {
        RansacOptions {
            max_iters: 200,
            thresh: 0.05,
            min_inliers: 6,
            confidence: 0.0,
            seed: 42,
            variant: RansacVariant::Vanilla,
        }
    }

    #[test]
    fn empty_input_gives_empty_result() {
        let res = ransac_fit::<ShiftEstimator>(&[], &opts());
        assert!(!res.success);
        assert!(res.model.is_none());
        assert!(res.inliers.is_empty() && res.inlier_mask.is_empty());
    }

    #[test]
    fn wrong_matches_are_rejected() {
        let data = matches();
        let res = ransac_fit::<ShiftEstimator>(&data, &opts());
        assert!(res.success);
        let shift = res.model.unwrap();
        assert!((shift[0] - 3.0).abs() < 0.02 && (shift[1] + 1.0).abs() < 1e-12);
        assert_eq!(res.inliers, (0..10).collect::<Vec<_>>());
        assert_eq!(res.inlier_mask.len(), data.len());
        assert_eq!(res.iters, 200, "confidence 0 runs the full budget");
    }

    #[test]
    fn local_optimization_averages_the_consensus() {
        let res = ransac_fit::<ShiftEstimator>(
            &matches(),
            &RansacOptions {
                variant: RansacVariant::LocalOptimization,
                ..opts()
            },
        );
        let shift = res.model.unwrap();
        assert!((shift[0] - 3.0).abs() < 1e-12, "refit shift {shift:?}");
        assert!((res.inlier_rms - 0.01).abs() < 1e-9, "rms {}", res.inlier_rms);
    }

    #[test]
    fn confidence_stops_early() {
        let res = ransac_fit::<ShiftEstimator>(
            &matches(),
            &RansacOptions {
                confidence: 0.99,
                ..opts()
            },
        );
        assert!(res.success);
        assert!(res.iters < 20, "{} draws", res.iters);
    }

    #[test]
    fn unreachable_consensus_returns_last_model() {
        let data = vec![
            ([0.0, 0.0], [1.0, 0.0]),
            ([0.0, 0.0], [0.0, 7.0]),
            ([0.0, 0.0], [-4.0, 2.0]),
        ];
        let res = ransac_fit::<ShiftEstimator>(&data, &opts());
        assert!(!res.success);
        assert!(res.model.is_some());
        assert_eq!(res.inliers.len(), 1);
    }

    #[test]
    fn equal_seeds_give_equal_results() {
        let data = matches();
        let run = |seed| {
            let res = ransac_fit::<ShiftEstimator>(
                &data,
                &RansacOptions {
                    seed,
                    thresh: 1.0,
                    confidence: 0.99,
                    ..opts()
                },
            );
            (res.model.unwrap(), res.inliers, res.iters)
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn min_inliers_is_raised_to_sample_size() {
        let data = vec![([0.0, 0.0], [2.0, 2.0])];
        let res = ransac_fit::<ShiftEstimator>(
            &data,
            &RansacOptions {
                min_inliers: 0,
                max_iters: 3,
                ..opts()
            },
        );
        assert!(res.success);
        assert_eq!(res.inliers, vec![0]);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut data = vec![([1.0, 1.0], [1.0, 1.0]); 4];
        data.push(([0.0, 0.0], [0.5, 0.0]));
        let res = ransac_fit::<ShiftEstimator>(
            &data,
            &RansacOptions {
                thresh: 0.5,
                min_inliers: 3,
                max_iters: 50,
                ..opts()
            },
        );
        assert!(res.success);
        assert_eq!(res.inliers, vec![0, 1, 2, 3]);
    }
}
