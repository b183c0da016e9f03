//! Residual-based rejection of detections.

use mvtraj_core::{BSplineTrajectory, Real};
use mvtraj_optim::bundle::reprojection_error;
use rayon::prelude::*;

use super::state::CameraState;

/// Reprojection error of every detection of a registered camera.
///
/// Empty when the camera has no pose. Invalid detections and capture times
/// outside the trajectory give `None`.
pub fn reprojection_errors(camera: &CameraState, spline: &BSplineTrajectory) -> Vec<Option<Real>> {
    let Some(pose) = camera.pose else {
        return Vec::new();
    };
    camera
        .detections
        .par_iter()
        .map(|d| {
            if !d.valid {
                return None;
            }
            reprojection_error(
                &camera.intrinsics,
                &pose,
                &camera.time,
                camera.rs,
                d,
                spline,
            )
        })
        .collect()
}

pub fn mean_reprojection_error(camera: &CameraState, spline: &BSplineTrajectory) -> Option<Real> {
    let errors: Vec<Real> = reprojection_errors(camera, spline)
        .into_iter()
        .flatten()
        .collect();
    (!errors.is_empty()).then(|| errors.iter().sum::<Real>() / errors.len() as Real)
}

/// Invalidate the detections reprojecting worse than `threshold` pixels.
///
/// Returns how many were removed. Detections outside the trajectory are
/// left alone, and invalidated ones are never restored.
pub fn flag_outliers(camera: &mut CameraState, spline: &BSplineTrajectory, threshold: Real) -> usize {
    let errors = reprojection_errors(camera, spline);
    let mut removed = 0;
    for (d, e) in camera.detections.iter_mut().zip(errors) {
        if e.is_some_and(|e| e > threshold) {
            d.valid = false;
            removed += 1;
        }
    }
    removed
}
