//! Parameter layout, residual assembly and Jacobian scattering.

use super::residual::{
    CAMERA_DIM, LOCAL_DIM, ObservationContext, POSE_DIM, RsParam, TIME_DIM,
    reprojection_residual_generic,
};
use super::{BundleCamera, BundleOptions, CameraEstimate};
use crate::{NllsProblem, RobustKernel};
use mvtraj_core::{
    BSplineTrajectory, FxFyCxCySkew, Iso3, Pt2, Pt3, Real, SplineError, SplineSegment, TimeModel,
};
use nalgebra::{DMatrix, DVector, SVector, Translation3, UnitQuaternion, Vector3};
use num_dual::{DualSVec64, jacobian};
use rayon::prelude::*;

/// Where one camera's parameters live.
#[derive(Debug, Clone)]
pub(super) struct CameraBlock {
    /// Offsets into the global vector; `None` for fixed blocks.
    pub pose: Option<usize>,
    pub time: Option<usize>,
    pub rs: Option<usize>,
    /// Current values of all nine slots (used for fixed blocks).
    values: [Real; CAMERA_DIM],
    rs_param: RsParam,
    intrinsics: FxFyCxCySkew<Real>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SegmentBlock {
    pub offset: usize,
    pub t0: Real,
    pub knot_spacing: Real,
    pub num_ctrl: usize,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Observation {
    pub camera: usize,
    pub segment: usize,
    frame: Real,
    pixel: Pt2,
}

/// Joint refinement of camera poses, time models, rolling-shutter delays
/// and spline control points.
///
/// Residual rows: two per observation, then three per interior control
/// point of every segment when motion regularization is enabled.
#[derive(Debug, Clone)]
pub struct BundleProblem {
    pub(super) cameras: Vec<CameraBlock>,
    pub(super) segments: Vec<SegmentBlock>,
    pub(super) observations: Vec<Observation>,
    num_params: usize,
    pub(super) motion_sqrt_weights: Option<[Real; 3]>,
    robust: RobustKernel,
    skipped: usize,
}

impl BundleProblem {
    /// Build the layout and the initial parameter vector.
    ///
    /// Each observation is attached to the segment containing its initial
    /// capture time; observations outside every segment are skipped.
    pub fn new(
        cameras: &[BundleCamera],
        spline: &BSplineTrajectory,
        opts: &BundleOptions,
    ) -> (Self, DVector<Real>) {
        let mut x = Vec::new();
        let mut push = |vals: &[Real]| {
            let offset = x.len();
            x.extend_from_slice(vals);
            offset
        };

        let mut blocks = Vec::with_capacity(cameras.len());
        for cam in cameras {
            let rs_param = match opts.rs_bounds {
                (lo, hi) if opts.rolling_shutter && hi > lo => RsParam::Bounded { lo, hi },
                _ => RsParam::Direct,
            };
            let values = encode_camera(&cam.camera_se3_world, &cam.time, rs_param.from_delay(cam.rs));
            let pose = (!cam.fix_pose).then(|| push(&values[..POSE_DIM]));
            let time = (!cam.fix_time).then(|| push(&values[POSE_DIM..POSE_DIM + TIME_DIM]));
            let rs = matches!(rs_param, RsParam::Bounded { .. })
                .then(|| push(&values[CAMERA_DIM - 1..]));
            blocks.push(CameraBlock {
                pose,
                time,
                rs,
                values,
                rs_param,
                intrinsics: cam.intrinsics,
            });
        }

        let mut segments = Vec::with_capacity(spline.segments.len());
        for seg in &spline.segments {
            let flat: Vec<Real> = seg
                .control_points()
                .iter()
                .flat_map(|c| [c.x, c.y, c.z])
                .collect();
            segments.push(SegmentBlock {
                offset: push(&flat),
                t0: seg.t0(),
                knot_spacing: seg.knot_spacing(),
                num_ctrl: seg.control_points().len(),
            });
        }

        let mut observations = Vec::new();
        let mut skipped = 0;
        for (ci, cam) in cameras.iter().enumerate() {
            for d in cam.detections.iter().filter(|d| d.valid) {
                let t = cam.time.capture_time(d.frame, d.pixel.y, cam.rs);
                match spline.segment_index(t) {
                    Some(segment) => observations.push(Observation {
                        camera: ci,
                        segment,
                        frame: d.frame,
                        pixel: d.pixel,
                    }),
                    None => skipped += 1,
                }
            }
        }

        let motion_sqrt_weights = opts
            .motion_reg
            .then(|| opts.motion_weights.map(|w| w.max(0.0).sqrt()));

        let problem = Self {
            cameras: blocks,
            segments,
            observations,
            num_params: x.len(),
            motion_sqrt_weights,
            robust: opts.robust,
            skipped,
        };
        (problem, DVector::from_vec(x))
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Detections left out because no segment covered them.
    pub fn num_skipped(&self) -> usize {
        self.skipped
    }

    fn num_motion_rows(&self) -> usize {
        if self.motion_sqrt_weights.is_none() {
            return 0;
        }
        self.segments
            .iter()
            .map(|s| 3 * s.num_ctrl.saturating_sub(2))
            .sum()
    }

    pub(super) fn camera_values(&self, x: &DVector<Real>, cam: usize) -> [Real; CAMERA_DIM] {
        let block = &self.cameras[cam];
        let mut v = block.values;
        if let Some(o) = block.pose {
            v[..POSE_DIM].copy_from_slice(&x.as_slice()[o..o + POSE_DIM]);
        }
        if let Some(o) = block.time {
            v[POSE_DIM..POSE_DIM + TIME_DIM].copy_from_slice(&x.as_slice()[o..o + TIME_DIM]);
        }
        if let Some(o) = block.rs {
            v[CAMERA_DIM - 1] = x[o];
        }
        v
    }

    /// Local parameters, residual context and global column of every local slot.
    pub(super) fn local(
        &self,
        x: &DVector<Real>,
        obs: &Observation,
    ) -> (SVector<Real, LOCAL_DIM>, ObservationContext, [Option<usize>; LOCAL_DIM]) {
        let block = &self.cameras[obs.camera];
        let seg = &self.segments[obs.segment];
        let cam = self.camera_values(x, obs.camera);

        let alpha = cam[POSE_DIM];
        let beta = cam[POSE_DIM + 1];
        let rs = block.rs_param.to_delay(cam[CAMERA_DIM - 1]);
        let t = alpha * (obs.frame + rs * obs.pixel.y) + beta;
        let span = locate_span(seg, t);

        let mut p = SVector::<Real, LOCAL_DIM>::zeros();
        p.fixed_rows_mut::<CAMERA_DIM>(0).copy_from_slice(&cam);
        let ctrl0 = seg.offset + 3 * span;
        p.fixed_rows_mut::<12>(CAMERA_DIM)
            .copy_from_slice(&x.as_slice()[ctrl0..ctrl0 + 12]);

        let mut cols = [None; LOCAL_DIM];
        if let Some(o) = block.pose {
            for k in 0..POSE_DIM {
                cols[k] = Some(o + k);
            }
        }
        if let Some(o) = block.time {
            for k in 0..TIME_DIM {
                cols[POSE_DIM + k] = Some(o + k);
            }
        }
        cols[CAMERA_DIM - 1] = block.rs;
        for k in 0..12 {
            cols[CAMERA_DIM + k] = Some(ctrl0 + k);
        }

        let ctx = ObservationContext {
            intrinsics: block.intrinsics,
            frame: obs.frame,
            pixel: obs.pixel,
            seg_t0: seg.t0,
            knot_spacing: seg.knot_spacing,
            span,
            rs: block.rs_param,
        };
        (p, ctx, cols)
    }

    /// Per-observation pixel residuals.
    pub(crate) fn reprojection_residuals(&self, x: &DVector<Real>) -> Vec<SVector<Real, 2>> {
        self.observations
            .par_iter()
            .map(|obs| {
                let (p, ctx, _) = self.local(x, obs);
                reprojection_residual_generic(p.as_slice(), &ctx)
            })
            .collect()
    }

    /// RMS pixel error over all observations.
    pub fn rms(&self, x: &DVector<Real>) -> Real {
        let r = self.reprojection_residuals(x);
        if r.is_empty() {
            return 0.0;
        }
        (r.iter().map(|v| v.norm_squared()).sum::<Real>() / r.len() as Real).sqrt()
    }

    fn motion_residuals(&self, x: &DVector<Real>, out: &mut [Real]) {
        let Some(sw) = self.motion_sqrt_weights else {
            return;
        };
        let mut row = 0;
        for seg in &self.segments {
            let inv_h2 = 1.0 / (seg.knot_spacing * seg.knot_spacing);
            for k in 1..seg.num_ctrl.saturating_sub(1) {
                for a in 0..3 {
                    let c = |i: usize| x[seg.offset + 3 * i + a];
                    out[row] = sw[a] * (c(k - 1) - 2.0 * c(k) + c(k + 1)) * inv_h2;
                    row += 1;
                }
            }
        }
    }

    /// Active span of every observation at `x`.
    pub(super) fn spans(&self, x: &DVector<Real>) -> Vec<usize> {
        self.observations
            .par_iter()
            .map(|obs| self.local(x, obs).1.span)
            .collect()
    }

    /// Decode the refined cameras and spline.
    pub fn decode(
        &self,
        x: &DVector<Real>,
    ) -> Result<(Vec<CameraEstimate>, BSplineTrajectory), SplineError> {
        let cameras = (0..self.cameras.len())
            .map(|ci| {
                let v = self.camera_values(x, ci);
                let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(v[0], v[1], v[2]));
                CameraEstimate {
                    camera_se3_world: Iso3::from_parts(
                        Translation3::new(v[3], v[4], v[5]),
                        rotation,
                    ),
                    time: TimeModel::new(v[6], v[7]),
                    rs: self.cameras[ci].rs_param.to_delay(v[8]),
                }
            })
            .collect();
        let segments = self
            .segments
            .iter()
            .map(|seg| {
                let ctrl = (0..seg.num_ctrl)
                    .map(|i| {
                        let o = seg.offset + 3 * i;
                        Pt3::new(x[o], x[o + 1], x[o + 2])
                    })
                    .collect();
                SplineSegment::new(seg.t0, seg.knot_spacing, ctrl)
            })
            .collect::<Result<_, _>>()?;
        Ok((cameras, BSplineTrajectory::new(segments)))
    }
}

fn encode_camera(pose: &Iso3, time: &TimeModel, rs_slot: Real) -> [Real; CAMERA_DIM] {
    let w = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [w.x, w.y, w.z, t.x, t.y, t.z, time.alpha, time.beta, rs_slot]
}

fn locate_span(seg: &SegmentBlock, t: Real) -> usize {
    let s = (t - seg.t0) / seg.knot_spacing;
    let last = seg.num_ctrl.saturating_sub(4);
    if s <= 0.0 || !s.is_finite() {
        0
    } else {
        (s.floor() as usize).min(last)
    }
}

impl NllsProblem for BundleProblem {
    fn num_params(&self) -> usize {
        self.num_params
    }

    fn num_residuals(&self) -> usize {
        2 * self.observations.len() + self.num_motion_rows()
    }

    fn raw_residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let mut r = DVector::zeros(self.num_residuals());
        for (i, v) in self.reprojection_residuals(x).iter().enumerate() {
            r[2 * i] = v[0];
            r[2 * i + 1] = v[1];
        }
        let start = 2 * self.observations.len();
        self.motion_residuals(x, &mut r.as_mut_slice()[start..]);
        r
    }

    fn raw_jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let mut j = DMatrix::zeros(self.num_residuals(), self.num_params);

        let blocks: Vec<_> = self
            .observations
            .par_iter()
            .map(|obs| {
                let (p0, ctx, cols) = self.local(x, obs);
                let (_, j_obs) = jacobian(
                    |p: SVector<DualSVec64<LOCAL_DIM>, LOCAL_DIM>| {
                        reprojection_residual_generic(p.as_slice(), &ctx)
                    },
                    p0,
                );
                (j_obs, cols)
            })
            .collect();

        for (i, (j_obs, cols)) in blocks.iter().enumerate() {
            for (local_col, global_col) in cols.iter().enumerate() {
                if let Some(g) = global_col {
                    j[(2 * i, *g)] = j_obs[(0, local_col)];
                    j[(2 * i + 1, *g)] = j_obs[(1, local_col)];
                }
            }
        }

        if let Some(sw) = self.motion_sqrt_weights {
            let mut row = 2 * self.observations.len();
            for seg in &self.segments {
                let inv_h2 = 1.0 / (seg.knot_spacing * seg.knot_spacing);
                for k in 1..seg.num_ctrl.saturating_sub(1) {
                    for a in 0..3 {
                        let col = |i: usize| seg.offset + 3 * i + a;
                        j[(row, col(k - 1))] = sw[a] * inv_h2;
                        j[(row, col(k))] = -2.0 * sw[a] * inv_h2;
                        j[(row, col(k + 1))] = sw[a] * inv_h2;
                        row += 1;
                    }
                }
            }
        }
        j
    }

    fn sqrt_weights(&self, raw: &DVector<Real>) -> Option<DVector<Real>> {
        if self.robust == RobustKernel::None {
            return None;
        }
        // Motion rows keep unit weight.
        let mut w = DVector::from_element(raw.len(), 1.0);
        for i in 0..self.observations.len() {
            let s = self.robust.row_scale(&raw.as_slice()[2 * i..2 * i + 2]);
            w[2 * i] = s;
            w[2 * i + 1] = s;
        }
        Some(w)
    }
}
