//! Direct Linear Transform (DLT) for camera pose from 2D-3D correspondences.
//!
//! Linear least-squares solve of the homogeneous projection equations on
//! intrinsics-normalized image points and similarity-normalized world
//! points; the rotation block is projected onto SO(3).

use anyhow::Result;
use mvtraj_core::{FxFyCxCySkew, IntrinsicsModel, Iso3, Mat34, Mat4, Pt2, Pt3, Real, Vec3};
use nalgebra::{DMatrix, Rotation3, Translation3, UnitQuaternion};

/// Minimum correspondences for the linear PnP solve.
pub const MIN_PNP_POINTS: usize = 6;

fn world_normalization(world: &[Pt3]) -> Result<Mat4> {
    let n = world.len() as Real;
    let c: Vec3 = world.iter().map(|p| p.coords).sum::<Vec3>() / n;
    let mean_dist = world.iter().map(|p| (p.coords - c).norm()).sum::<Real>() / n;
    if mean_dist <= Real::EPSILON {
        anyhow::bail!("degenerate 3d point configuration for normalization");
    }
    let s = 3.0_f64.sqrt() / mean_dist;
    Ok(Mat4::new(
        s,
        0.0,
        0.0,
        -s * c.x,
        0.0,
        s,
        0.0,
        -s * c.y,
        0.0,
        0.0,
        s,
        -s * c.z,
        0.0,
        0.0,
        0.0,
        1.0,
    ))
}

/// Direct linear PnP on all input points.
///
/// Returns `camera_se3_world`, the transform from world to camera coordinates.
pub fn dlt(world: &[Pt3], image: &[Pt2], k: &FxFyCxCySkew<Real>) -> Result<Iso3> {
    let n = world.len();
    if n < MIN_PNP_POINTS || image.len() != n {
        anyhow::bail!(
            "need at least {MIN_PNP_POINTS} matching 2d-3d correspondences, got {n} world / {} image",
            image.len()
        );
    }

    let t_world = world_normalization(world)?;
    let mut a = DMatrix::<Real>::zeros((2 * n).max(12), 12);
    for (i, (pw, pi)) in world.iter().zip(image).enumerate() {
        let q = t_world * pw.to_homogeneous();
        let m = k.pixel_to_normalized(pi);
        let (r0, r1) = (2 * i, 2 * i + 1);
        for j in 0..4 {
            a[(r0, j)] = q[j];
            a[(r0, 8 + j)] = -m.x * q[j];
            a[(r1, 4 + j)] = q[j];
            a[(r1, 8 + j)] = -m.y * q[j];
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow::anyhow!("svd failed in PnP DLT"))?;
    let row = v_t.row(11);
    let p_norm = Mat34::from_fn(|r, c| row[4 * r + c]);
    let p = p_norm * t_world;

    let mut m = p.fixed_view::<3, 3>(0, 0).into_owned();
    let mut scale = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if m.determinant() < 0.0 {
        scale = -scale;
    }
    if scale.abs() <= Real::EPSILON {
        anyhow::bail!("degenerate projection matrix in PnP DLT");
    }
    m /= scale;

    let svd = m.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| anyhow::anyhow!("svd failed in PnP DLT"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow::anyhow!("svd failed in PnP DLT"))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }

    let t: Vec3 = p.column(3) / scale;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}
