//! Discrete samples to a smoothing B-spline trajectory.
//!
//! Each gap-free run of samples becomes one [`SplineSegment`]. Control points
//! solve the penalized least-squares system
//!
//! ```text
//! (BᵀB + λ DᵀD) c = Bᵀ X
//! ```
//!
//! where `B` holds the cubic basis weights of every sample, `D` is the
//! second-difference operator on control points and `λ` the smoothing factor.
//! The system matrix has bandwidth four, so it is assembled and factored in
//! band storage: time and memory grow linearly with the track length.

use anyhow::{Result, ensure};
use log::debug;
use mvtraj_core::{BSplineTrajectory, Pt3, Real, SplineSegment, TrajectorySample, cubic_basis};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Diagonal ridge keeping the normal equations positive definite when a
/// span has no samples.
const RIDGE: Real = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineFitOptions {
    /// Weight of the second-difference penalty; higher is smoother.
    pub smooth_factor: Real,
    /// Target knot spacing in global frames. The effective spacing is
    /// shrunk so that the knots end exactly at the last sample.
    pub knot_spacing: Real,
    /// Consecutive samples further apart than this start a new segment.
    pub max_gap: Real,
    /// Runs with fewer samples are dropped.
    pub min_segment_samples: usize,
}

impl Default for SplineFitOptions {
    fn default() -> Self {
        Self {
            smooth_factor: 0.01,
            knot_spacing: 2.0,
            max_gap: 10.0,
            min_segment_samples: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SplineFitReport {
    pub rms: Real,
    pub max_residual: Real,
    pub num_samples: usize,
    pub num_segments: usize,
}

/// Split time-sorted samples wherever two neighbours are more than `max_gap` apart.
pub fn split_at_gaps(samples: &[TrajectorySample], max_gap: Real) -> Vec<&[TrajectorySample]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..samples.len() {
        if samples[i].time - samples[i - 1].time > max_gap {
            runs.push(&samples[start..i]);
            start = i;
        }
    }
    if start < samples.len() {
        runs.push(&samples[start..]);
    }
    runs
}

/// Fit a smoothing spline through `samples` (any order).
///
/// Fails when no run has at least `min_segment_samples` samples.
pub fn fit_smoothing_spline(
    samples: &[TrajectorySample],
    opts: &SplineFitOptions,
) -> Result<(BSplineTrajectory, SplineFitReport)> {
    ensure!(opts.knot_spacing > 0.0, "knot spacing must be positive");
    ensure!(opts.smooth_factor >= 0.0, "smoothing factor must be non-negative");

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut segments = Vec::new();
    let mut sq_sum = 0.0;
    let mut max_residual: Real = 0.0;
    let mut used = 0;
    for run in split_at_gaps(&sorted, opts.max_gap) {
        if run.len() < opts.min_segment_samples.max(1) {
            debug!(
                "dropping {} samples at t={:.2}: too short for a segment",
                run.len(),
                run[0].time
            );
            continue;
        }
        let segment = fit_segment(run, opts)?;
        for s in run {
            let r = (segment.evaluate(s.time) - s.point).norm();
            sq_sum += r * r;
            max_residual = max_residual.max(r);
        }
        used += run.len();
        segments.push(segment);
    }
    ensure!(
        !segments.is_empty(),
        "no run of samples long enough for a spline segment ({} samples)",
        samples.len()
    );

    let report = SplineFitReport {
        rms: (sq_sum / used as Real).sqrt(),
        max_residual,
        num_samples: used,
        num_segments: segments.len(),
    };
    debug!(
        "spline fit: {} segments, {} samples, rms {:.3e}",
        report.num_segments, report.num_samples, report.rms
    );
    Ok((BSplineTrajectory::new(segments), report))
}

fn fit_segment(run: &[TrajectorySample], opts: &SplineFitOptions) -> Result<SplineSegment> {
    let t0 = run[0].time;
    let span = run[run.len() - 1].time - t0;
    let (num_spans, h) = if span > 0.0 {
        let n = (span / opts.knot_spacing).ceil().max(1.0) as usize;
        (n, span / n as Real)
    } else {
        (1, opts.knot_spacing)
    };
    let n_ctrl = num_spans + 3;

    let mut normal = BandedSpd::zeros(n_ctrl);
    let mut rhs = vec![Vector3::<Real>::zeros(); n_ctrl];
    for s in run {
        let x = (s.time - t0) / h;
        let span_idx = (x.floor().max(0.0) as usize).min(num_spans - 1);
        let w = cubic_basis(x - span_idx as Real);
        for a in 0..4 {
            for b in 0..=a {
                normal.add(span_idx + a, span_idx + b, w[a] * w[b]);
            }
            rhs[span_idx + a] += s.point.coords * w[a];
        }
    }

    // DᵀD for rows (1, -2, 1).
    let lambda = opts.smooth_factor;
    if lambda > 0.0 {
        let stencil = [1.0, -2.0, 1.0];
        for row in 0..n_ctrl - 2 {
            for a in 0..3 {
                for b in 0..=a {
                    normal.add(row + a, row + b, lambda * stencil[a] * stencil[b]);
                }
            }
        }
    }
    for i in 0..n_ctrl {
        normal.add(i, i, RIDGE);
    }

    let chol = normal
        .factor()
        .ok_or_else(|| anyhow::anyhow!("spline normal equations are not positive definite"))?;
    chol.solve(&mut rhs);
    let control_points = rhs.into_iter().map(Pt3::from).collect();
    Ok(SplineSegment::new(t0, h, control_points)?)
}

/// Width of the lower band of the normal matrix: a cubic span couples four
/// consecutive control points.
const BAND: usize = 4;

/// Symmetric positive definite matrix with `BAND - 1` sub-diagonals.
///
/// Row `i` stores `(i, i - d)` at index `d`; the upper triangle is implied.
#[derive(Debug, Clone)]
struct BandedSpd {
    rows: Vec<[Real; BAND]>,
}

impl BandedSpd {
    fn zeros(n: usize) -> Self {
        Self {
            rows: vec![[0.0; BAND]; n],
        }
    }

    /// Accumulate into the lower-triangle entry `(i, j)`, `j <= i < j + BAND`.
    fn add(&mut self, i: usize, j: usize, v: Real) {
        debug_assert!(j <= i && i - j < BAND, "({i}, {j}) outside the band");
        self.rows[i][i - j] += v;
    }

    /// In-place Cholesky factor `A = L Lᵀ`; `L` keeps the band.
    fn factor(mut self) -> Option<BandedCholesky> {
        let l = &mut self.rows;
        for i in 0..l.len() {
            // Farthest column first, so row i's earlier entries are final.
            for d in (0..BAND.min(i + 1)).rev() {
                let j = i - d;
                let mut sum = l[i][d];
                for k in i.saturating_sub(BAND - 1)..j {
                    sum -= l[i][i - k] * l[j][j - k];
                }
                if d == 0 {
                    if !(sum > 0.0) {
                        return None;
                    }
                    l[i][0] = sum.sqrt();
                } else {
                    l[i][d] = sum / l[j][0];
                }
            }
        }
        Some(BandedCholesky { l: self.rows })
    }
}

#[derive(Debug, Clone)]
struct BandedCholesky {
    l: Vec<[Real; BAND]>,
}

impl BandedCholesky {
    /// Overwrite `b` with the solution of `L Lᵀ x = b`, one column per axis.
    fn solve(&self, b: &mut [Vector3<Real>]) {
        let l = &self.l;
        let n = l.len();
        for i in 0..n {
            let mut acc = b[i];
            for k in i.saturating_sub(BAND - 1)..i {
                acc -= b[k] * l[i][i - k];
            }
            b[i] = acc / l[i][0];
        }
        for i in (0..n).rev() {
            let mut acc = b[i];
            for k in i + 1..n.min(i + BAND) {
                acc -= b[k] * l[k][k - i];
            }
            b[i] = acc / l[i][0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvtraj_core::synthetic::curve_point;

    fn curve_samples(times: impl Iterator<Item = Real>) -> Vec<TrajectorySample> {
        times.map(|t| TrajectorySample::new(t, curve_point(t))).collect()
    }

    #[test]
    fn resampling_at_inputs_stays_within_fit_residual() {
        let samples = curve_samples((0..120).map(|i| i as Real));
        let (spline, report) =
            fit_smoothing_spline(&samples, &SplineFitOptions::default()).unwrap();
        assert_eq!(report.num_segments, 1);
        for s in &samples {
            let p = spline.evaluate(s.time).expect("sample time inside domain");
            assert!((p - s.point).norm() <= report.max_residual + 1e-12);
        }
        assert!(report.rms < 1e-3, "smooth curve fit rms {}", report.rms);
    }

    #[test]
    fn gaps_split_the_trajectory() {
        let times = (0..40).map(|i| i as Real).chain((80..120).map(|i| i as Real));
        let samples = curve_samples(times);
        let (spline, report) =
            fit_smoothing_spline(&samples, &SplineFitOptions::default()).unwrap();
        assert_eq!(report.num_segments, 2);
        assert!(spline.evaluate(60.0).is_none());
        let (t0, t1) = spline.domain().unwrap();
        assert!((t0 - 0.0).abs() < 1e-12 && (t1 - 119.0).abs() < 1e-9);
    }

    #[test]
    fn larger_smoothing_factor_rejects_more_noise() {
        let noisy: Vec<TrajectorySample> = (0..200)
            .map(|i| {
                let t = i as Real;
                let jitter = if i % 2 == 0 { 0.05 } else { -0.05 };
                TrajectorySample::new(t, curve_point(t) + Vector3::repeat(jitter))
            })
            .collect();
        let err = |lambda: Real| {
            let opts = SplineFitOptions {
                smooth_factor: lambda,
                knot_spacing: 1.0,
                ..Default::default()
            };
            let (spline, _) = fit_smoothing_spline(&noisy, &opts).unwrap();
            noisy
                .iter()
                .map(|s| (spline.evaluate(s.time).unwrap() - curve_point(s.time)).norm())
                .sum::<Real>()
                / noisy.len() as Real
        };
        let rough = err(1e-6);
        let smooth = err(10.0);
        assert!(smooth < 0.5 * rough, "smooth {smooth} vs rough {rough}");
    }

    #[test]
    fn banded_cholesky_matches_dense_solve() {
        let n = 9;
        let mut banded = BandedSpd::zeros(n);
        let mut dense = nalgebra::DMatrix::<Real>::zeros(n, n);
        for i in 0..n {
            for d in 0..BAND.min(i + 1) {
                let v = if d == 0 { 6.0 + i as Real } else { 1.0 / (d + i) as Real };
                banded.add(i, i - d, v);
                dense[(i, i - d)] = v;
                dense[(i - d, i)] = v;
            }
        }
        let b: Vec<Vector3<Real>> = (0..n)
            .map(|i| Vector3::new(i as Real, 1.0, -(i as Real).sqrt()))
            .collect();
        let mut x = b.clone();
        banded.factor().unwrap().solve(&mut x);

        let chol = dense.cholesky().unwrap();
        for axis in 0..3 {
            let rhs = nalgebra::DVector::from_iterator(n, b.iter().map(|v| v[axis]));
            let expected = chol.solve(&rhs);
            for i in 0..n {
                assert!((x[i][axis] - expected[i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn indefinite_band_is_rejected() {
        let mut m = BandedSpd::zeros(2);
        m.add(0, 0, 1.0);
        m.add(1, 0, 2.0);
        m.add(1, 1, 1.0);
        assert!(m.factor().is_none());
    }

    #[test]
    fn long_tracks_fit_in_linear_time() {
        // 20k samples with knot spacing 2: over ten thousand control points.
        let samples = curve_samples((0..20_000).map(|i| i as Real));
        let started = std::time::Instant::now();
        let (spline, report) =
            fit_smoothing_spline(&samples, &SplineFitOptions::default()).unwrap();
        let elapsed = started.elapsed();
        assert!(spline.num_control_points() > 10_000);
        assert!(report.rms < 1e-3, "rms {}", report.rms);
        assert!(elapsed.as_secs_f64() < 10.0, "fit took {elapsed:?}");
    }

    #[test]
    fn short_runs_are_dropped() {
        let samples = curve_samples([0.0, 1.0, 50.0, 51.0, 52.0, 53.0, 54.0].into_iter());
        let (spline, report) =
            fit_smoothing_spline(&samples, &SplineFitOptions::default()).unwrap();
        assert_eq!(report.num_segments, 1);
        assert_eq!(report.num_samples, 5);
        assert!(!spline.covers(0.5));

        let too_few = curve_samples([0.0, 1.0].into_iter());
        assert!(fit_smoothing_spline(&too_few, &SplineFitOptions::default()).is_err());
    }
}
