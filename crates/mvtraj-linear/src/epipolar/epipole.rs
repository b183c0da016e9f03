//! Epipoles and canonical projective cameras from a fundamental matrix.

use crate::EpipolarError;
use mvtraj_core::{Mat3, Mat34, Real, Vec3, skew};

fn null_vector(m: &Mat3) -> Result<Vec3, EpipolarError> {
    let svd = m.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or(EpipolarError::DegenerateModel("svd failed on fundamental matrix"))?;
    let e: Vec3 = v_t.row(2).transpose();
    // Finite epipoles are scaled to e_z = 1; points at infinity stay unit length.
    if e.z.abs() > 1e-12 {
        Ok(e / e.z)
    } else {
        Ok(e.normalize())
    }
}

/// Epipole in the first image: `F e = 0`.
pub fn epipole_right(f: &Mat3) -> Result<Vec3, EpipolarError> {
    null_vector(f)
}

/// Epipole in the second image: `F^T e' = 0`.
pub fn epipole_left(f: &Mat3) -> Result<Vec3, EpipolarError> {
    null_vector(&f.transpose())
}

/// Second camera of the canonical pair `P1 = [I | 0]`, `P2 = [[e']× F | e']`.
///
/// `e'` is the left epipole (null vector of `F^T`). The pair reproduces `F`
/// up to scale and defines a projective reconstruction.
pub fn projection_from_fundamental(f: &Mat3) -> Result<Mat34, EpipolarError> {
    let e = epipole_left(f)?;
    let m = skew(&e) * f;
    if m.norm() <= Real::EPSILON {
        return Err(EpipolarError::DegenerateModel("fundamental matrix has rank below 2"));
    }
    let mut p = Mat34::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(&m);
    p.fixed_view_mut::<3, 1>(0, 3).copy_from(&e);
    Ok(p)
}
