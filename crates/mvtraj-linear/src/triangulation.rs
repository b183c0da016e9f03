//! Linear triangulation of 3D points from multiple views.
//!
//! Uses a DLT formulation on the camera projection matrices and image points.

use anyhow::Result;
use mvtraj_core::{Mat34, Pt2, Pt3, Real, project_with};
use nalgebra::DMatrix;

/// Linear triangulation from two or more views using DLT.
///
/// `cameras` are projection matrices `P_i`, and `points` are the matching
/// image coordinates (pixels for `K [R|t]`, normalized for `[R|t]`). The
/// returned point is in the world frame of the cameras.
pub fn triangulate_point_linear(cameras: &[Mat34], points: &[Pt2]) -> Result<Pt3> {
    if cameras.len() < 2 {
        anyhow::bail!("need at least 2 views, got {}", cameras.len());
    }
    if cameras.len() != points.len() {
        anyhow::bail!(
            "mismatched number of cameras ({}) and points ({})",
            cameras.len(),
            points.len()
        );
    }

    let mut a = DMatrix::<Real>::zeros(2 * cameras.len(), 4);
    for (i, (p, cam)) in points.iter().zip(cameras).enumerate() {
        let row2 = cam.row(2);
        a.row_mut(2 * i).copy_from(&(p.x * row2 - cam.row(0)));
        a.row_mut(2 * i + 1).copy_from(&(p.y * row2 - cam.row(1)));
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow::anyhow!("svd failed during triangulation"))?;
    let x_h = v_t.row(v_t.nrows() - 1);

    let w = x_h[3];
    if w.abs() <= Real::EPSILON {
        anyhow::bail!("triangulated point lies at infinity");
    }
    Ok(Pt3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w))
}

/// Largest reprojection error of `x` over the given views.
///
/// Returns `None` if the point projects onto a camera plane.
pub fn max_reprojection_error(cameras: &[Mat34], points: &[Pt2], x: &Pt3) -> Option<Real> {
    cameras
        .iter()
        .zip(points)
        .map(|(cam, uv)| project_with(cam, x).map(|p| (p - uv).norm()))
        .try_fold(0.0, |acc: Real, e| e.map(|e| acc.max(e)))
}
