//! Essential matrix decomposition and cheirality-based pose selection.

use super::enforce_essential;
use crate::EpipolarError;
use crate::triangulation::triangulate_point_linear;
use mvtraj_core::{Iso3, Mat3, Mat34, Pt2, Vec3};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};

/// Decompose an essential matrix into the four candidate `(R, t)` pairs.
///
/// Translations are unit length (direction only). The correct candidate is
/// selected by cheirality, see [`recover_relative_pose`].
pub fn decompose_essential(e: &Mat3) -> Result<[(Mat3, Vec3); 4], EpipolarError> {
    let e = enforce_essential(e)?;
    let svd = e.svd(true, true);
    let mut u = svd
        .u
        .ok_or(EpipolarError::DegenerateModel("svd failed on essential matrix"))?;
    let mut v_t = svd
        .v_t
        .ok_or(EpipolarError::DegenerateModel("svd failed on essential matrix"))?;

    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t: Vec3 = u.column(2).normalize();

    Ok([(r1, t), (r1, -t), (r2, t), (r2, -t)])
}

/// Relative pose of the second camera w.r.t. the first.
#[derive(Debug, Clone)]
pub struct RelativePose {
    /// `camera2_se3_camera1`, with a unit-length translation.
    pub pose: Iso3,
    /// Correspondences triangulated in front of both cameras.
    pub in_front: usize,
}

/// Choose the decomposition of `e` that puts most points in front of both cameras.
///
/// `pts1`/`pts2` are normalized (intrinsics-free) correspondences.
pub fn recover_relative_pose(
    e: &Mat3,
    pts1: &[Pt2],
    pts2: &[Pt2],
) -> Result<RelativePose, EpipolarError> {
    super::check_counts(pts1, pts2)?;
    let p1 = Mat34::identity();

    let mut best: Option<RelativePose> = None;
    for (r, t) in decompose_essential(e)? {
        let mut p2 = Mat34::zeros();
        p2.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        p2.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);

        let in_front = pts1
            .iter()
            .zip(pts2)
            .filter(|(a, b)| {
                triangulate_point_linear(&[p1, p2], &[**a, **b]).is_ok_and(|x| {
                    let z2 = (r * x.coords + t).z;
                    x.z > 0.0 && z2 > 0.0
                })
            })
            .count();

        if best.as_ref().is_none_or(|b| in_front > b.in_front) {
            let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
            best = Some(RelativePose {
                pose: Iso3::from_parts(Translation3::from(t), rot),
                in_front,
            });
        }
    }

    match best {
        Some(b) if b.in_front > 0 => Ok(b),
        _ => Err(EpipolarError::DegenerateModel("no decomposition passes cheirality")),
    }
}
