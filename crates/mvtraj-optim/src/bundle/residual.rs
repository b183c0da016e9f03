//! Generic reprojection residual of one detection against the spline.
//!
//! Local parameter vector (`LOCAL_DIM = 21`):
//!
//! | range  | meaning                                      |
//! |--------|----------------------------------------------|
//! | 0..3   | camera rotation (axis-angle, world → camera) |
//! | 3..6   | camera translation                           |
//! | 6..8   | time model `alpha`, `beta`                   |
//! | 8      | rolling-shutter parameter                    |
//! | 9..21  | the four control points of the active span   |

use mvtraj_core::{FxFyCxCySkew, Pt2, Real, evaluate_span};
use nalgebra::{RealField, SVector, Vector3};

pub(crate) const POSE_DIM: usize = 6;
pub(crate) const TIME_DIM: usize = 2;
pub(crate) const CAMERA_DIM: usize = POSE_DIM + TIME_DIM + 1;
pub(crate) const CTRL_DIM: usize = 12;
pub(crate) const LOCAL_DIM: usize = CAMERA_DIM + CTRL_DIM;

const PROJECTION_EPS: Real = 1e-9;

/// How the rolling-shutter slot maps to a readout delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RsParam {
    /// The slot holds the delay itself (held fixed).
    Direct,
    /// The slot holds a logit; the delay is squeezed into `[lo, hi]`.
    Bounded { lo: Real, hi: Real },
}

impl RsParam {
    pub fn to_delay<T: RealField>(self, p: T) -> T {
        match self {
            RsParam::Direct => p,
            RsParam::Bounded { lo, hi } => {
                let lo_t = T::from_f64(lo).unwrap();
                let range = T::from_f64(hi - lo).unwrap();
                lo_t + range / (T::one() + (-p).exp())
            }
        }
    }

    pub fn from_delay(self, rs: Real) -> Real {
        match self {
            RsParam::Direct => rs,
            RsParam::Bounded { lo, hi } => {
                let s = ((rs - lo) / (hi - lo)).clamp(1e-6, 1.0 - 1e-6);
                (s / (1.0 - s)).ln()
            }
        }
    }
}

/// Constant data of one detection's residual.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObservationContext {
    pub intrinsics: FxFyCxCySkew<Real>,
    pub frame: Real,
    pub pixel: Pt2,
    pub seg_t0: Real,
    pub knot_spacing: Real,
    pub span: usize,
    pub rs: RsParam,
}

/// Rotate `p` by the axis-angle vector `w` (Rodrigues).
///
/// Falls back to the first-order form near zero so derivatives stay finite.
pub(crate) fn rotate_axis_angle<T: RealField>(w: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta2 = w.dot(w);
    if theta2 > T::from_f64(1e-16).unwrap() {
        let theta = theta2.sqrt();
        let k = w / theta.clone();
        let (s, c) = (theta.clone().sin(), theta.cos());
        p * c.clone() + k.cross(p) * s + k.clone() * (k.dot(p) * (T::one() - c))
    } else {
        p + w.cross(p)
    }
}

/// Global capture time of the detection for the local parameters `p`.
pub(crate) fn capture_time<T: RealField>(p: &[T], ctx: &ObservationContext) -> T {
    let rs = ctx.rs.to_delay(p[8].clone());
    let local = T::from_f64(ctx.frame).unwrap() + rs * T::from_f64(ctx.pixel.y).unwrap();
    p[6].clone() * local + p[7].clone()
}

/// `observed - projected`, in pixels.
pub(crate) fn reprojection_residual_generic<T: RealField>(
    p: &[T],
    ctx: &ObservationContext,
) -> SVector<T, 2> {
    debug_assert_eq!(p.len(), LOCAL_DIM);

    let w = Vector3::new(p[0].clone(), p[1].clone(), p[2].clone());
    let t = Vector3::new(p[3].clone(), p[4].clone(), p[5].clone());

    let time = capture_time(p, ctx);
    let u = (time - T::from_f64(ctx.seg_t0).unwrap()) / T::from_f64(ctx.knot_spacing).unwrap()
        - T::from_f64(ctx.span as Real).unwrap();
    let ctrl = [0, 1, 2, 3].map(|k| {
        let o = CAMERA_DIM + 3 * k;
        Vector3::new(p[o].clone(), p[o + 1].clone(), p[o + 2].clone())
    });
    let pw = evaluate_span(&ctrl, u);
    let pc = rotate_axis_angle(&w, &pw) + t;

    let k = &ctx.intrinsics;
    let z = pc.z.clone() + T::from_f64(PROJECTION_EPS).unwrap();
    let x = pc.x.clone() / z.clone();
    let y = pc.y.clone() / z;
    let proj_u = T::from_f64(k.fx).unwrap() * x
        + T::from_f64(k.skew).unwrap() * y.clone()
        + T::from_f64(k.cx).unwrap();
    let proj_v = T::from_f64(k.fy).unwrap() * y + T::from_f64(k.cy).unwrap();

    SVector::<T, 2>::new(
        T::from_f64(ctx.pixel.x).unwrap() - proj_u,
        T::from_f64(ctx.pixel.y).unwrap() - proj_v,
    )
}
