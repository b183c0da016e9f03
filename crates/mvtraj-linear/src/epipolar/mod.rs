//! Two-view epipolar geometry.
//!
//! - Fundamental matrix `F` expects **pixel coordinates** in both images and
//!   satisfies `x2^T F x1 = 0`.
//! - Essential matrix `E` expects **normalized coordinates** (after applying
//!   `K^{-1}`).
//!
//! Linear solvers run on Hartley-normalized points and return matrices with
//! unit Frobenius norm.

mod decomposition;
mod epipole;
mod essential;
mod fundamental;

pub use decomposition::{RelativePose, decompose_essential, recover_relative_pose};
pub use epipole::{epipole_left, epipole_right, projection_from_fundamental};
pub use essential::{enforce_essential, essential_8point, essential_from_fundamental};
pub use fundamental::{
    Correspondence, FundamentalEstimator, fundamental_8point, fundamental_8point_ransac,
    sampson_error,
};

use crate::EpipolarError;
use mvtraj_core::{Mat3, Pt2, Real};
use nalgebra::{DMatrix, SMatrix, Vector3};

/// Minimum correspondences for the linear 8-point solvers.
pub const MIN_CORRESPONDENCES: usize = 8;

pub(crate) fn check_counts(pts1: &[Pt2], pts2: &[Pt2]) -> Result<(), EpipolarError> {
    if pts1.len() != pts2.len() {
        return Err(EpipolarError::MismatchedCounts {
            left: pts1.len(),
            right: pts2.len(),
        });
    }
    if pts1.len() < MIN_CORRESPONDENCES {
        return Err(EpipolarError::InsufficientCorrespondences {
            needed: MIN_CORRESPONDENCES,
            got: pts1.len(),
        });
    }
    Ok(())
}

/// Null vector of the bilinear constraint system, reshaped row-major to 3×3.
///
/// Rows follow `x2^T M x1 = 0` with `x1 = (x, y, 1)` and `x2 = (x', y', 1)`.
pub(crate) fn solve_bilinear(pts1: &[Pt2], pts2: &[Pt2]) -> Result<Mat3, EpipolarError> {
    let n = pts1.len();
    // Pad to a square system so the SVD exposes the full 9-dim right space.
    let rows = n.max(9);
    let mut a = DMatrix::<Real>::zeros(rows, 9);
    for (i, (p1, p2)) in pts1.iter().zip(pts2).enumerate() {
        let (x, y, xp, yp) = (p1.x, p1.y, p2.x, p2.y);
        a[(i, 0)] = xp * x;
        a[(i, 1)] = xp * y;
        a[(i, 2)] = xp;
        a[(i, 3)] = yp * x;
        a[(i, 4)] = yp * y;
        a[(i, 5)] = yp;
        a[(i, 6)] = x;
        a[(i, 7)] = y;
        a[(i, 8)] = 1.0;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or(EpipolarError::DegenerateModel("svd failed on design matrix"))?;
    let s = &svd.singular_values;
    // A second (near) null vector means the sample does not pin down the model.
    if s[7] <= 1e-12 * s[0].max(Real::EPSILON) {
        return Err(EpipolarError::DegenerateModel("design matrix rank below 8"));
    }

    let f = v_t.row(8);
    Ok(Mat3::new(f[0], f[1], f[2], f[3], f[4], f[5], f[6], f[7], f[8]))
}

/// Project onto matrices with the given singular values; `None` keeps the
/// two largest and zeroes the smallest.
pub(crate) fn project_singular_values(
    m: &Mat3,
    values: Option<(Real, Real)>,
) -> Result<Mat3, EpipolarError> {
    let svd = m.svd(true, true);
    let u = svd
        .u
        .ok_or(EpipolarError::DegenerateModel("svd failed on 3x3 model"))?;
    let v_t = svd
        .v_t
        .ok_or(EpipolarError::DegenerateModel("svd failed on 3x3 model"))?;
    let s = svd.singular_values;
    let diag = match values {
        Some((s0, s1)) => Vector3::new(s0, s1, 0.0),
        None => Vector3::new(s[0], s[1], 0.0),
    };
    Ok(u * SMatrix::<Real, 3, 3>::from_diagonal(&diag) * v_t)
}

pub(crate) fn unit_frobenius(m: Mat3) -> Result<Mat3, EpipolarError> {
    let norm = m.norm();
    if norm <= Real::EPSILON {
        return Err(EpipolarError::DegenerateModel("vanishing model matrix"));
    }
    Ok(m / norm)
}
