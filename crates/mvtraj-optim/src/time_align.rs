//! Recovery of per-camera time models.
//!
//! Two strategies, both built on the shared RANSAC engine:
//!
//! - [`align_to_trajectory`]: for a posed camera, match every detection to
//!   the global time whose projected trajectory point lies closest to it,
//!   then fit `global = alpha * local + beta` robustly over those pairs.
//! - [`search_time_offset`]: before any trajectory exists, scan candidate
//!   offsets against the reference camera and keep the one whose induced
//!   correspondences are most consistent with a single fundamental matrix.

use anyhow::{Result, bail, ensure};
use log::debug;
use mvtraj_core::{
    BSplineTrajectory, Detection, Estimator, FxFyCxCySkew, Iso3, Pt2, RansacOptions, RansacVariant,
    Real, TimeModel, ransac_fit,
};
use mvtraj_linear::epipolar::{Correspondence, FundamentalEstimator};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One `(local, global)` time correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePair {
    /// Local capture time in camera frames (rolling-shutter corrected).
    pub local: Real,
    /// Matched global time.
    pub global: Real,
}

/// RANSAC strategy fitting both scale and offset.
#[derive(Debug, Clone, Copy)]
pub struct TimeModelEstimator;

impl Estimator for TimeModelEstimator {
    type Datum = TimePair;
    type Model = TimeModel;

    const MIN_SAMPLES: usize = 2;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let n = sample_indices.len() as Real;
        let (sl, sg) = sample_indices.iter().fold((0.0, 0.0), |(sl, sg), &i| {
            (sl + data[i].local, sg + data[i].global)
        });
        let (ml, mg) = (sl / n, sg / n);
        let (mut sll, mut slg) = (0.0, 0.0);
        for &i in sample_indices {
            let dl = data[i].local - ml;
            sll += dl * dl;
            slg += dl * (data[i].global - mg);
        }
        if sll < 1e-12 {
            return None;
        }
        let alpha = slg / sll;
        if !alpha.is_finite() || alpha <= 0.0 {
            return None;
        }
        Some(TimeModel::new(alpha, mg - alpha * ml))
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        (model.to_global(datum.local) - datum.global).abs()
    }
}

/// A time pair tagged with a known scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledTimePair {
    pub pair: TimePair,
    pub alpha: Real,
}

/// RANSAC strategy fitting the offset only; the scale travels with each datum.
#[derive(Debug, Clone, Copy)]
pub struct TimeOffsetEstimator;

impl Estimator for TimeOffsetEstimator {
    type Datum = ScaledTimePair;
    type Model = TimeModel;

    const MIN_SAMPLES: usize = 1;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let first = sample_indices.first()?;
        let alpha = data[*first].alpha;
        let beta = sample_indices
            .iter()
            .map(|&i| data[i].pair.global - alpha * data[i].pair.local)
            .sum::<Real>()
            / sample_indices.len() as Real;
        Some(TimeModel::new(alpha, beta))
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        TimeModelEstimator::residual(model, &datum.pair)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeAlignOptions {
    /// Fit `alpha` as well; otherwise keep the prior scale.
    pub estimate_scale: bool,
    /// Spacing of the projected trajectory grid, in global frames.
    pub grid_step: Real,
    /// Detections farther than this from the projected trajectory are not matched.
    pub max_match_px: Real,
    /// Only match within `prior ± window` global frames when set.
    pub search_window: Option<Real>,
    /// Golden-section iterations refining each match between grid nodes.
    pub refine_iters: usize,
    /// Threshold in global frames.
    pub ransac: RansacOptions,
}

impl Default for TimeAlignOptions {
    fn default() -> Self {
        Self {
            estimate_scale: true,
            grid_step: 0.5,
            max_match_px: 10.0,
            search_window: None,
            refine_iters: 40,
            ransac: RansacOptions {
                max_iters: 500,
                thresh: 0.5,
                min_inliers: 8,
                variant: RansacVariant::LocalOptimization,
                ..RansacOptions::default()
            },
        }
    }
}

/// A camera with known intrinsics and pose, seen as a time-to-pixel map.
#[derive(Debug, Clone, Copy)]
pub struct PosedCamera<'a> {
    pub intrinsics: &'a FxFyCxCySkew<Real>,
    pub camera_se3_world: &'a Iso3,
    /// Rolling-shutter readout delay per row, in local frames.
    pub rs: Real,
}

impl PosedCamera<'_> {
    fn project_at(&self, spline: &BSplineTrajectory, segment: usize, t: Real) -> Option<Pt2> {
        let p = spline.segments[segment].evaluate(t);
        self.intrinsics
            .project(&self.camera_se3_world.transform_point(&p).coords)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAlignment {
    pub model: TimeModel,
    /// Indices (into the input detections) of the consistent matches.
    pub inliers: Vec<usize>,
    pub num_matches: usize,
    /// RMS time residual of the inliers, in global frames.
    pub rms: Real,
}

struct GridNode {
    t: Real,
    segment: usize,
    pixel: Pt2,
}

/// Robustly fit a camera's time model against an existing trajectory.
///
/// `prior` supplies the scale when `estimate_scale` is off and the centre of
/// the search window when one is configured.
pub fn align_to_trajectory(
    camera: PosedCamera<'_>,
    prior: &TimeModel,
    detections: &[Detection],
    spline: &BSplineTrajectory,
    opts: &TimeAlignOptions,
) -> Result<TimeAlignment> {
    ensure!(!spline.is_empty(), "cannot align against an empty trajectory");
    ensure!(opts.grid_step > 0.0, "grid step must be positive");

    let mut grid = Vec::new();
    for (segment, seg) in spline.segments.iter().enumerate() {
        let n = ((seg.t_end() - seg.t0()) / opts.grid_step).ceil() as usize;
        for k in 0..=n {
            let t = (seg.t0() + k as Real * opts.grid_step).min(seg.t_end());
            if let Some(pixel) = camera.project_at(spline, segment, t) {
                grid.push(GridNode { t, segment, pixel });
            }
        }
    }
    ensure!(!grid.is_empty(), "trajectory does not project into the camera");

    let matches: Vec<(usize, TimePair)> = detections
        .par_iter()
        .enumerate()
        .filter(|(_, d)| d.valid)
        .filter_map(|(i, d)| {
            let local = d.frame + camera.rs * d.pixel.y;
            let centre = prior.to_global(local);
            let node = grid
                .iter()
                .filter(|n| opts.search_window.is_none_or(|w| (n.t - centre).abs() <= w))
                .min_by(|a, b| {
                    (a.pixel - d.pixel)
                        .norm_squared()
                        .total_cmp(&(b.pixel - d.pixel).norm_squared())
                })?;
            let (t, dist) = refine_match(camera, spline, node, &d.pixel, opts);
            (dist <= opts.max_match_px).then_some((i, TimePair { local, global: t }))
        })
        .collect();

    debug!(
        "time alignment: {} of {} detections matched to the trajectory",
        matches.len(),
        detections.len()
    );

    let pairs: Vec<TimePair> = matches.iter().map(|(_, p)| *p).collect();
    let res = if opts.estimate_scale {
        ransac_fit::<TimeModelEstimator>(&pairs, &opts.ransac)
    } else {
        let scaled: Vec<ScaledTimePair> = pairs
            .iter()
            .map(|&pair| ScaledTimePair {
                pair,
                alpha: prior.alpha,
            })
            .collect();
        ransac_fit::<TimeOffsetEstimator>(&scaled, &opts.ransac)
    };

    match res.model {
        Some(model) if res.success => Ok(TimeAlignment {
            model,
            inliers: res.inliers.iter().map(|&k| matches[k].0).collect(),
            num_matches: matches.len(),
            rms: res.inlier_rms,
        }),
        _ => bail!(
            "time alignment found {} consistent matches out of {}, need {}",
            res.inliers.len(),
            matches.len(),
            opts.ransac.min_inliers
        ),
    }
}

/// Golden-section search of the pixel distance around a grid node.
fn refine_match(
    camera: PosedCamera<'_>,
    spline: &BSplineTrajectory,
    node: &GridNode,
    target: &Pt2,
    opts: &TimeAlignOptions,
) -> (Real, Real) {
    let seg = &spline.segments[node.segment];
    let dist = |t: Real| {
        camera
            .project_at(spline, node.segment, t)
            .map_or(Real::INFINITY, |p| (p - target).norm())
    };
    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut a = (node.t - opts.grid_step).max(seg.t0());
    let mut b = (node.t + opts.grid_step).min(seg.t_end());
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let (mut fc, mut fd) = (dist(c), dist(d));
    for _ in 0..opts.refine_iters {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = dist(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = dist(d);
        }
    }
    let t = 0.5 * (a + b);
    let refined = dist(t);
    let node_dist = (node.pixel - target).norm();
    if refined <= node_dist {
        (t, refined)
    } else {
        (node.t, node_dist)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSearchOptions {
    /// Offsets are searched in `prior.beta + [min_offset, max_offset]`.
    pub min_offset: Real,
    pub max_offset: Real,
    pub coarse_step: Real,
    pub fine_step: Real,
    /// Reference detections further apart than this (global frames) are
    /// not interpolated between.
    pub max_interp_gap: Real,
    /// Sampson threshold in squared pixels.
    pub ransac: RansacOptions,
}

impl Default for SyncSearchOptions {
    fn default() -> Self {
        Self {
            min_offset: -100.0,
            max_offset: 100.0,
            coarse_step: 1.0,
            fine_step: 0.05,
            max_interp_gap: 2.0,
            ransac: RansacOptions {
                max_iters: 200,
                thresh: 1.0,
                min_inliers: 16,
                ..RansacOptions::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetScore {
    pub beta: Real,
    pub pairs: usize,
    pub inliers: usize,
    pub rms: Real,
}

impl OffsetScore {
    fn beats(&self, other: &OffsetScore) -> bool {
        self.inliers > other.inliers || (self.inliers == other.inliers && self.rms < other.rms)
    }
}

/// Pixel of a time-sorted track at global time `t`, linearly interpolated.
pub fn interpolate_track(track: &[(Real, Pt2)], t: Real, max_gap: Real) -> Option<Pt2> {
    let idx = track.partition_point(|(ti, _)| *ti < t);
    if let Some((ti, p)) = track.get(idx) {
        if (ti - t).abs() < 1e-9 {
            return Some(*p);
        }
    }
    let (t0, p0) = track.get(idx.checked_sub(1)?)?;
    let (t1, p1) = track.get(idx)?;
    if t1 - t0 > max_gap {
        return None;
    }
    let w = (t - t0) / (t1 - t0);
    Some(p0 + (p1 - p0) * w)
}

/// Global capture-time track of a camera's valid detections, sorted by time.
///
/// `rs` is the camera's readout delay per row, so each detection is stamped
/// with the same time the bundle residuals use.
pub fn global_track(detections: &[Detection], time: &TimeModel, rs: Real) -> Vec<(Real, Pt2)> {
    let mut track: Vec<(Real, Pt2)> = detections
        .iter()
        .filter(|d| d.valid)
        .map(|d| (time.capture_time(d.frame, d.pixel.y, rs), d.pixel))
        .collect();
    track.sort_by(|a, b| a.0.total_cmp(&b.0));
    track
}

/// Epipolar consistency of the correspondences induced by one candidate offset.
pub fn score_offset(
    reference: &[(Real, Pt2)],
    other: &[Detection],
    alpha: Real,
    beta: Real,
    opts: &SyncSearchOptions,
) -> Option<OffsetScore> {
    let data: Vec<Correspondence> = other
        .iter()
        .filter(|d| d.valid)
        .filter_map(|d| {
            let x1 = interpolate_track(reference, alpha * d.frame + beta, opts.max_interp_gap)?;
            Some(Correspondence { x1, x2: d.pixel })
        })
        .collect();
    if data.len() < FundamentalEstimator::MIN_SAMPLES.max(opts.ransac.min_inliers) {
        return None;
    }
    let res = ransac_fit::<FundamentalEstimator>(&data, &opts.ransac);
    res.model.as_ref()?;
    Some(OffsetScore {
        beta,
        pairs: data.len(),
        inliers: res.inliers.len(),
        rms: res.inlier_rms,
    })
}

/// Coarse-to-fine search of a camera's time offset against the reference camera.
///
/// `prior` supplies the scale (usually the frame-rate ratio) and the centre
/// of the search range.
pub fn search_time_offset(
    reference: &[Detection],
    reference_time: &TimeModel,
    other: &[Detection],
    prior: &TimeModel,
    opts: &SyncSearchOptions,
) -> Result<OffsetScore> {
    ensure!(
        opts.coarse_step > 0.0 && opts.fine_step > 0.0,
        "search steps must be positive"
    );
    ensure!(opts.max_offset >= opts.min_offset, "empty offset range");
    // Readout delays are not estimated before the first bundle adjustment.
    let track = global_track(reference, reference_time, 0.0);

    let scan = |lo: Real, hi: Real, step: Real| -> Option<OffsetScore> {
        let n = ((hi - lo) / step + 1e-9).floor() as usize;
        let scores: Vec<Option<OffsetScore>> = (0..=n)
            .into_par_iter()
            .map(|k| score_offset(&track, other, prior.alpha, lo + k as Real * step, opts))
            .collect();
        scores
            .into_iter()
            .flatten()
            .fold(None, |best: Option<OffsetScore>, s| match best {
                Some(b) if !s.beats(&b) => Some(b),
                _ => Some(s),
            })
    };

    let Some(coarse) = scan(
        prior.beta + opts.min_offset,
        prior.beta + opts.max_offset,
        opts.coarse_step,
    ) else {
        bail!("no candidate offset produced enough overlapping detections");
    };
    let fine = scan(
        coarse.beta - opts.coarse_step,
        coarse.beta + opts.coarse_step,
        opts.fine_step,
    )
    .filter(|f| !coarse.beats(f))
    .unwrap_or(coarse);

    debug!(
        "offset search: coarse beta {:.2} ({} inliers), fine beta {:.3} ({} / {} inliers)",
        coarse.beta, coarse.inliers, fine.beta, fine.inliers, fine.pairs
    );
    Ok(fine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_pairs_define_the_line() {
        let data = [
            TimePair {
                local: 10.0,
                global: 12.0,
            },
            TimePair {
                local: 30.0,
                global: 22.0,
            },
        ];
        let m = TimeModelEstimator::fit(&data, &[0, 1]).unwrap();
        assert!((m.alpha - 0.5).abs() < 1e-12);
        assert!((m.beta - 7.0).abs() < 1e-12);
        assert!(TimeModelEstimator::fit(&data, &[0, 0]).is_none());
    }

    #[test]
    fn time_model_ransac_ignores_wrong_matches() {
        let truth = TimeModel::new(1.25, -3.0);
        let pairs: Vec<TimePair> = (0..60)
            .map(|i| {
                let local = i as Real;
                let mut global = truth.to_global(local);
                if i % 6 == 0 {
                    global += 15.0;
                }
                TimePair { local, global }
            })
            .collect();
        let opts = RansacOptions {
            thresh: 0.1,
            ..TimeAlignOptions::default().ransac
        };
        let res = ransac_fit::<TimeModelEstimator>(&pairs, &opts);
        assert!(res.success);
        assert_eq!(res.inliers.len(), 50);
        let m = res.model.unwrap();
        assert!((m.alpha - 1.25).abs() < 1e-9 && (m.beta + 3.0).abs() < 1e-9);
    }

    #[test]
    fn offset_only_estimator_keeps_scale() {
        let data: Vec<ScaledTimePair> = (0..5)
            .map(|i| ScaledTimePair {
                pair: TimePair {
                    local: i as Real,
                    global: 2.0 * i as Real + 4.0,
                },
                alpha: 2.0,
            })
            .collect();
        let m = TimeOffsetEstimator::fit(&data, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(m.alpha, 2.0);
        assert!((m.beta - 4.0).abs() < 1e-12);
    }

    #[test]
    fn global_track_uses_rolling_shutter_capture_times() {
        let time = TimeModel::new(2.0, 10.0);
        let detections = [
            Detection::new(0.0, Pt2::new(5.0, 1000.0)),
            Detection::new(1.0, Pt2::new(6.0, 0.0)),
        ];
        let track = global_track(&detections, &time, 2e-3);
        // Frame 0 is read out two frames late, after frame 1.
        assert_eq!(track[0], (12.0, Pt2::new(6.0, 0.0)));
        assert!((track[1].0 - time.capture_time(0.0, 1000.0, 2e-3)).abs() < 1e-12);
        assert!((track[1].0 - 14.0).abs() < 1e-12);

        let global = global_track(&detections, &time, 0.0);
        assert_eq!(global[0].0, 10.0);
    }

    #[test]
    fn track_interpolation_respects_gaps() {
        let track = vec![
            (0.0, Pt2::new(0.0, 0.0)),
            (1.0, Pt2::new(2.0, 4.0)),
            (5.0, Pt2::new(0.0, 0.0)),
        ];
        let p = interpolate_track(&track, 0.25, 2.0).unwrap();
        assert!((p - Pt2::new(0.5, 1.0)).norm() < 1e-12);
        assert_eq!(interpolate_track(&track, 1.0, 2.0), Some(Pt2::new(2.0, 4.0)));
        assert!(interpolate_track(&track, 3.0, 2.0).is_none());
        assert!(interpolate_track(&track, -1.0, 2.0).is_none());
        assert!(interpolate_track(&track, 6.0, 2.0).is_none());
    }
}
