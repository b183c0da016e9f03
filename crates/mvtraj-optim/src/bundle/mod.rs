//! Bundle adjustment over cameras, time models and the spline trajectory.
//!
//! The reprojection residual of a detection compares its pixel with the
//! projection of the spline evaluated at the detection's global capture
//! time, so every residual couples one camera's nine parameters with the
//! four control points of one span, and the Jacobian is sparse.
//!
//! Two backends solve the problem. [`BundleBackend::TinySolver`] hands the
//! residual blocks to tiny-solver's sparse Levenberg–Marquardt and scales to
//! long tracks. [`BundleBackend::DenseLm`] assembles a dense Jacobian from
//! per-detection autodiff blocks and suits small problems and cross-checks.

mod problem;
mod residual;
mod tiny;

pub use problem::BundleProblem;

use crate::{LmBackend, NllsProblem, NllsSolverBackend, RobustKernel, SolveOptions};
use anyhow::{Result, ensure};
use log::{debug, warn};
use mvtraj_core::{BSplineTrajectory, Detection, FxFyCxCySkew, Iso3, Real, TimeModel};
use serde::{Deserialize, Serialize};

/// One camera taking part in the adjustment.
#[derive(Debug, Clone)]
pub struct BundleCamera {
    pub intrinsics: FxFyCxCySkew<Real>,
    pub camera_se3_world: Iso3,
    pub time: TimeModel,
    /// Rolling-shutter delay per image row, in local frames.
    pub rs: Real,
    /// Hold the pose (gauge camera).
    pub fix_pose: bool,
    /// Hold the time model (reference camera).
    pub fix_time: bool,
    /// Invalid detections are ignored.
    pub detections: Vec<Detection>,
}

/// Dense Jacobians above this many entries trigger a warning.
const DENSE_WARN_ENTRIES: usize = 50_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleBackend {
    /// Sparse normal equations through tiny-solver.
    #[default]
    TinySolver,
    /// Dense Jacobian through `levenberg-marquardt`.
    DenseLm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    pub backend: BundleBackend,
    /// Optimize the per-camera rolling-shutter delay.
    pub rolling_shutter: bool,
    /// The delay is kept strictly inside these bounds.
    pub rs_bounds: (Real, Real),
    /// Penalize second differences of control points.
    pub motion_reg: bool,
    /// Per-axis weights of the motion penalty.
    pub motion_weights: [Real; 3],
    pub robust: RobustKernel,
    pub solve: SolveOptions,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            backend: BundleBackend::default(),
            rolling_shutter: false,
            rs_bounds: (-0.002, 0.002),
            motion_reg: false,
            motion_weights: [1.0; 3],
            robust: RobustKernel::None,
            solve: SolveOptions::default(),
        }
    }
}

/// Refined values of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraEstimate {
    pub camera_se3_world: Iso3,
    pub time: TimeModel,
    pub rs: Real,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleReport {
    /// RMS pixel error before and after, over the used observations.
    pub initial_rms: Real,
    pub final_rms: Real,
    /// Residual evaluations; the sparse backend does not count them.
    pub evaluations: Option<usize>,
    pub converged: bool,
    pub termination: String,
    pub num_observations: usize,
    pub num_skipped: usize,
    pub num_params: usize,
}

#[derive(Debug, Clone)]
pub struct BundleResult {
    /// In the order of the input cameras.
    pub cameras: Vec<CameraEstimate>,
    pub spline: BSplineTrajectory,
    pub report: BundleReport,
}

/// Jointly refine cameras and trajectory.
///
/// Non-convergence is not an error: the best parameters found are returned
/// and a warning is logged.
pub fn bundle_adjust(
    cameras: &[BundleCamera],
    spline: &BSplineTrajectory,
    opts: &BundleOptions,
) -> Result<BundleResult> {
    ensure!(!cameras.is_empty(), "bundle adjustment needs at least one camera");
    ensure!(!spline.is_empty(), "bundle adjustment needs a trajectory");
    match opts.robust {
        RobustKernel::Huber { delta } => ensure!(delta > 0.0, "Huber delta must be positive"),
        RobustKernel::Cauchy { c } => ensure!(c > 0.0, "Cauchy scale must be positive"),
        RobustKernel::None => {}
    }
    ensure!(
        !opts.rolling_shutter || opts.rs_bounds.1 >= opts.rs_bounds.0,
        "invalid rolling-shutter bounds {:?}",
        opts.rs_bounds
    );

    let (problem, x0) = BundleProblem::new(cameras, spline, opts);
    ensure!(
        problem.num_observations() > 0,
        "no valid detection falls inside the trajectory"
    );

    let initial_rms = problem.rms(&x0);
    debug!(
        "bundle adjustment: {} cameras, {} observations ({} skipped), {} params, rms {:.4}",
        cameras.len(),
        problem.num_observations(),
        problem.num_skipped(),
        x0.len(),
        initial_rms
    );

    let (x, solve, evaluations) = match opts.backend {
        BundleBackend::TinySolver => {
            let (x, solve) = tiny::solve_sparse(&problem, x0, opts.robust, &opts.solve)?;
            (x, solve, None)
        }
        BundleBackend::DenseLm => {
            let entries = problem.num_residuals().saturating_mul(problem.num_params());
            if entries > DENSE_WARN_ENTRIES {
                warn!(
                    "dense bundle adjustment allocates a {}x{} Jacobian; consider the sparse backend",
                    problem.num_residuals(),
                    problem.num_params()
                );
            }
            let (x, solve) = LmBackend.solve(&problem, x0, &opts.solve);
            let evaluations = solve.evaluations;
            (x, solve, Some(evaluations))
        }
    };
    let final_rms = problem.rms(&x);
    let (estimates, refined) = problem.decode(&x)?;

    if !solve.converged {
        warn!(
            "ConvergenceWarning: bundle adjustment stopped ({}), rms {:.4} px",
            solve.termination, final_rms
        );
    }

    Ok(BundleResult {
        cameras: estimates,
        spline: refined,
        report: BundleReport {
            initial_rms,
            final_rms,
            evaluations,
            converged: solve.converged,
            termination: solve.termination,
            num_observations: problem.num_observations(),
            num_skipped: problem.num_skipped(),
            num_params: problem.num_params(),
        },
    })
}

/// Pixel distance between a detection and the projection of the trajectory
/// at its capture time.
///
/// `None` when the capture time falls outside the trajectory or the point
/// is behind the camera.
pub fn reprojection_error(
    intrinsics: &FxFyCxCySkew<Real>,
    camera_se3_world: &Iso3,
    time: &TimeModel,
    rs: Real,
    detection: &Detection,
    spline: &BSplineTrajectory,
) -> Option<Real> {
    let t = time.capture_time(detection.frame, detection.pixel.y, rs);
    let p = spline.evaluate(t)?;
    let uv = intrinsics.project(&camera_se3_world.transform_point(&p).coords)?;
    Some((uv - detection.pixel).norm())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvtraj_core::{Pt2, Pt3, SplineSegment};
    use nalgebra::{Translation3, UnitQuaternion};

    fn intrinsics() -> FxFyCxCySkew<Real> {
        FxFyCxCySkew {
            fx: 700.0,
            fy: 700.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        }
    }

    fn straight_line() -> BSplineTrajectory {
        let ctrl = (0..8).map(|i| Pt3::new(0.1 * i as Real, 0.0, 5.0)).collect();
        BSplineTrajectory::new(vec![SplineSegment::new(0.0, 2.0, ctrl).unwrap()])
    }

    #[test]
    fn reprojection_error_uses_capture_time() {
        let spline = straight_line();
        let pose = Iso3::identity();
        let k = intrinsics();
        // Line point at t = 4: x = 0.1 * (1 + 4 / 2) = 0.3.
        let expected = k.project(&nalgebra::Vector3::new(0.3, 0.0, 5.0)).unwrap();
        let d = Detection::new(3.0, expected);
        let shifted = TimeModel::new(1.0, 1.0);
        let err = reprojection_error(&k, &pose, &shifted, 0.0, &d, &spline).unwrap();
        assert!(err < 1e-9, "err {err}");
        let err = reprojection_error(&k, &pose, &TimeModel::identity(), 0.0, &d, &spline).unwrap();
        assert!(err > 1.0);
        let outside = Detection::new(100.0, Pt2::new(0.0, 0.0));
        assert!(reprojection_error(&k, &pose, &shifted, 0.0, &outside, &spline).is_none());
    }

    #[test]
    fn motion_regularization_adds_rows() {
        let spline = straight_line();
        let cam = BundleCamera {
            intrinsics: intrinsics(),
            camera_se3_world: Iso3::from_parts(
                Translation3::new(0.0, 0.0, 0.0),
                UnitQuaternion::identity(),
            ),
            time: TimeModel::identity(),
            rs: 0.0,
            fix_pose: true,
            fix_time: true,
            detections: (0..10)
                .map(|f| Detection::new(f as Real, Pt2::new(320.0, 240.0)))
                .collect(),
        };
        let opts = BundleOptions {
            motion_reg: true,
            ..Default::default()
        };
        let (problem, x0) = BundleProblem::new(std::slice::from_ref(&cam), &spline, &opts);
        assert_eq!(x0.len(), 24);
        assert_eq!(problem.num_observations(), 10);
        assert_eq!(problem.num_residuals(), 20 + 3 * 6);
        // Collinear, evenly spaced control points have zero second differences.
        let r = problem.raw_residuals(&x0);
        assert!(r.rows(20, 18).norm() < 1e-12);
        let j = problem.raw_jacobian(&x0);
        assert_eq!(j[(20, 0)], 0.25);
        assert_eq!(j[(20, 3)], -0.5);
    }
}
