//! Essential matrix estimation from normalized correspondences.

use super::{check_counts, project_singular_values, solve_bilinear};
use crate::EpipolarError;
use crate::normalization::normalize_points_2d;
use mvtraj_core::{Mat3, Pt2};

/// Project a 3×3 matrix onto the essential manifold with singular values `(1, 1, 0)`.
pub fn enforce_essential(e: &Mat3) -> Result<Mat3, EpipolarError> {
    project_singular_values(e, Some((1.0, 1.0)))
}

/// Linear 8-point essential matrix.
///
/// Inputs must already be normalized by the camera intrinsics. The result
/// satisfies `x2^T E x1 ≈ 0` and has singular values `(1, 1, 0)`.
pub fn essential_8point(pts1: &[Pt2], pts2: &[Pt2]) -> Result<Mat3, EpipolarError> {
    check_counts(pts1, pts2)?;

    let n1 = normalize_points_2d(pts1)
        .ok_or(EpipolarError::DegenerateModel("coincident points in first view"))?;
    let n2 = normalize_points_2d(pts2)
        .ok_or(EpipolarError::DegenerateModel("coincident points in second view"))?;
    let q1: Vec<Pt2> = (0..n1.len()).map(|i| n1.point(i)).collect();
    let q2: Vec<Pt2> = (0..n2.len()).map(|i| n2.point(i)).collect();

    let e_n = enforce_essential(&solve_bilinear(&q1, &q2)?)?;
    enforce_essential(&(n2.transform.transpose() * e_n * n1.transform))
}

/// `E = K2^T F K1`, projected onto the essential manifold.
pub fn essential_from_fundamental(f: &Mat3, k1: &Mat3, k2: &Mat3) -> Result<Mat3, EpipolarError> {
    enforce_essential(&(k2.transpose() * f * k1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epipolar::fundamental_8point;
    use mvtraj_core::{Pt3, Real, skew};
    use nalgebra::{Rotation3, Vector3};

    fn normalized_two_view(n: usize) -> (Vec<Pt2>, Vec<Pt2>, Mat3) {
        let rot = Rotation3::from_euler_angles(0.1, -0.2, 0.05);
        let t = Vector3::new(0.6, -0.1, 0.15);
        let mut p1 = Vec::new();
        let mut p2 = Vec::new();
        for i in 0..n {
            let a = i as Real * 0.45;
            let x = Pt3::new(a.cos(), (0.8 * a).sin() * 0.7, 4.0 + 0.5 * (1.7 * a).cos());
            let y = rot * x + t;
            p1.push(Pt2::new(x.x / x.z, x.y / x.z));
            p2.push(Pt2::new(y.x / y.z, y.y / y.z));
        }
        let e_true = skew(&t) * rot.matrix();
        (p1, p2, e_true)
    }

    fn assert_unit_unit_zero(e: &Mat3) {
        let s = e.svd(false, false).singular_values;
        let mut v = [s[0], s[1], s[2]];
        v.sort_by(|a, b| b.total_cmp(a));
        assert!((v[0] - 1.0).abs() < 1e-9, "singular values {v:?}");
        assert!((v[1] - 1.0).abs() < 1e-9, "singular values {v:?}");
        assert!(v[2].abs() < 1e-9, "singular values {v:?}");
    }

    #[test]
    fn essential_has_unit_unit_zero_singular_values() {
        let (p1, p2, e_true) = normalized_two_view(20);
        let e = essential_8point(&p1, &p2).unwrap();
        assert_unit_unit_zero(&e);

        // Equal to the true essential matrix up to scale and sign.
        let e_true = e_true / e_true.norm();
        let e_n = e / e.norm();
        let diff = (e_n - e_true).norm().min((e_n + e_true).norm());
        assert!(diff < 1e-8, "essential mismatch {diff}");
    }

    #[test]
    fn essential_from_fundamental_round_trip() {
        let (n1, n2, _) = normalized_two_view(20);
        let k = Mat3::new(800.0, 0.0, 640.0, 0.0, 780.0, 360.0, 0.0, 0.0, 1.0);
        let to_px = |p: &Pt2| Pt2::new(800.0 * p.x + 640.0, 780.0 * p.y + 360.0);
        let p1: Vec<Pt2> = n1.iter().map(to_px).collect();
        let p2: Vec<Pt2> = n2.iter().map(to_px).collect();
        let f = fundamental_8point(&p1, &p2).unwrap();
        let e = essential_from_fundamental(&f, &k, &k).unwrap();
        assert_unit_unit_zero(&e);
        for (a, b) in n1.iter().zip(&n2) {
            let r = mvtraj_core::to_homogeneous(b).dot(&(e * mvtraj_core::to_homogeneous(a)));
            assert!(r.abs() < 1e-9, "epipolar residual {r}");
        }
    }
}
