//! Fundamental matrix estimation: normalized 8-point and RANSAC.

use super::{check_counts, project_singular_values, solve_bilinear, unit_frobenius};
use crate::EpipolarError;
use crate::normalization::normalize_points_2d;
use mvtraj_core::{Estimator, Mat3, Pt2, RansacOptions, Real, ransac_fit, to_homogeneous};

/// Normalized 8-point algorithm for the fundamental matrix.
///
/// `pts1` and `pts2` are corresponding pixel points. The returned matrix has
/// rank 2, unit Frobenius norm, and satisfies `x2^T F x1 ≈ 0`.
pub fn fundamental_8point(pts1: &[Pt2], pts2: &[Pt2]) -> Result<Mat3, EpipolarError> {
    check_counts(pts1, pts2)?;

    let n1 = normalize_points_2d(pts1)
        .ok_or(EpipolarError::DegenerateModel("coincident points in first view"))?;
    let n2 = normalize_points_2d(pts2)
        .ok_or(EpipolarError::DegenerateModel("coincident points in second view"))?;
    let q1: Vec<Pt2> = (0..n1.len()).map(|i| n1.point(i)).collect();
    let q2: Vec<Pt2> = (0..n2.len()).map(|i| n2.point(i)).collect();

    let f_n = solve_bilinear(&q1, &q2)?;
    let f_n = project_singular_values(&f_n, None)?;

    unit_frobenius(n2.transform.transpose() * f_n * n1.transform)
}

/// First-order geometric error of one correspondence w.r.t. `F`.
///
/// `(x2^T F x1)^2 / ((F x1)_0^2 + (F x1)_1^2 + (F^T x2)_0^2 + (F^T x2)_1^2)`,
/// in squared pixels.
pub fn sampson_error(f: &Mat3, x1: &Pt2, x2: &Pt2) -> Real {
    let h1 = to_homogeneous(x1);
    let h2 = to_homogeneous(x2);
    let fx1 = f * h1;
    let ftx2 = f.transpose() * h2;
    let num = h2.dot(&fx1).powi(2);
    let den = fx1.x * fx1.x + fx1.y * fx1.y + ftx2.x * ftx2.x + ftx2.y * ftx2.y;
    if den <= Real::EPSILON {
        return Real::INFINITY;
    }
    num / den
}

/// A pixel correspondence between two views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub x1: Pt2,
    pub x2: Pt2,
}

/// RANSAC strategy: 8-point fit, Sampson error score.
#[derive(Debug, Clone, Copy)]
pub struct FundamentalEstimator;

impl Estimator for FundamentalEstimator {
    type Datum = Correspondence;
    type Model = Mat3;

    const MIN_SAMPLES: usize = 8;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let (p1, p2): (Vec<Pt2>, Vec<Pt2>) = sample_indices
            .iter()
            .map(|&i| (data[i].x1, data[i].x2))
            .unzip();
        fundamental_8point(&p1, &p2).ok()
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        sampson_error(model, &datum.x1, &datum.x2)
    }

    fn is_degenerate(data: &[Self::Datum], sample_indices: &[usize]) -> bool {
        sample_indices.iter().enumerate().any(|(k, &i)| {
            sample_indices[k + 1..]
                .iter()
                .any(|&j| (data[i].x1 - data[j].x1).norm() < 1e-9)
        })
    }
}

/// Robust fundamental matrix: 8-point inside RANSAC, scored by Sampson error.
///
/// `opts.thresh` is in squared pixels. Returns the consensus matrix and the
/// per-correspondence inlier mask.
pub fn fundamental_8point_ransac(
    pts1: &[Pt2],
    pts2: &[Pt2],
    opts: &RansacOptions,
) -> Result<(Mat3, Vec<bool>), EpipolarError> {
    check_counts(pts1, pts2)?;
    let data: Vec<Correspondence> = pts1
        .iter()
        .zip(pts2)
        .map(|(&x1, &x2)| Correspondence { x1, x2 })
        .collect();

    let res = ransac_fit::<FundamentalEstimator>(&data, opts);
    match res.model {
        Some(f) if res.success => Ok((f, res.inlier_mask)),
        _ => Err(EpipolarError::NoConsensus {
            inliers: res.inliers.len(),
            required: opts.min_inliers.max(FundamentalEstimator::MIN_SAMPLES),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvtraj_core::{FxFyCxCySkew, Iso3, Pt3};
    use nalgebra::{Translation3, UnitQuaternion};

    fn intrinsics() -> FxFyCxCySkew<Real> {
        FxFyCxCySkew {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        }
    }

    fn two_view(n: usize) -> (Vec<Pt2>, Vec<Pt2>) {
        let k = intrinsics();
        let cam2 = Iso3::from_parts(
            Translation3::new(-0.8, 0.1, 0.2),
            UnitQuaternion::from_euler_angles(0.05, 0.25, -0.03),
        );
        let mut p1 = Vec::new();
        let mut p2 = Vec::new();
        for i in 0..n {
            let a = i as Real * 0.7;
            let x = Pt3::new(a.sin() * 1.5, (1.3 * a).cos(), 5.0 + (0.4 * a).sin());
            p1.push(k.project(&x.coords).unwrap());
            p2.push(k.project(&cam2.transform_point(&x).coords).unwrap());
        }
        (p1, p2)
    }

    #[test]
    fn eight_point_is_rank_two_and_consistent() {
        let (p1, p2) = two_view(30);
        let f = fundamental_8point(&p1, &p2).unwrap();
        let svd = f.svd(false, false);
        let s = svd.singular_values;
        assert!(f.determinant().abs() < 1e-12, "det(F) = {}", f.determinant());
        assert!(s[2] < 1e-12 * s[0] && s[1] > 1e-6 * s[0], "singular values {s:?}");
        assert!((f.norm() - 1.0).abs() < 1e-12);
        for (a, b) in p1.iter().zip(&p2) {
            assert!(sampson_error(&f, a, b) < 1e-12);
        }
    }

    #[test]
    fn eight_point_rejects_bad_inputs() {
        let (p1, p2) = two_view(7);
        assert_eq!(
            fundamental_8point(&p1, &p2),
            Err(EpipolarError::InsufficientCorrespondences { needed: 8, got: 7 })
        );
        let (p1, p2) = two_view(10);
        assert!(matches!(
            fundamental_8point(&p1, &p2[..9]),
            Err(EpipolarError::MismatchedCounts { left: 10, right: 9 })
        ));
    }

    #[test]
    fn sampson_error_matches_closed_form() {
        let f = Mat3::new(0.0, -1.0, 2.0, 1.0, 0.0, -3.0, -2.0, 3.0, 0.0);
        let x1 = Pt2::new(0.5, 1.5);
        let x2 = Pt2::new(-1.0, 2.0);
        let fx1 = f * to_homogeneous(&x1);
        let ftx2 = f.transpose() * to_homogeneous(&x2);
        let algebraic = to_homogeneous(&x2).dot(&fx1);
        let expected = algebraic * algebraic
            / (fx1[0].powi(2) + fx1[1].powi(2) + ftx2[0].powi(2) + ftx2[1].powi(2));
        assert!((sampson_error(&f, &x1, &x2) - expected).abs() < 1e-12);
    }

    #[test]
    fn ransac_isolates_the_eight_true_inliers() {
        let (mut p1, mut p2) = two_view(8);
        // Outliers far from their epipolar lines.
        p1.push(Pt2::new(100.0, 100.0));
        p2.push(Pt2::new(1100.0, 650.0));
        p1.push(Pt2::new(900.0, 200.0));
        p2.push(Pt2::new(80.0, 600.0));
        p1.push(Pt2::new(400.0, 650.0));
        p2.push(Pt2::new(1200.0, 50.0));

        let opts = RansacOptions {
            max_iters: 2000,
            thresh: 1e-3,
            min_inliers: 8,
            seed: 7,
            ..RansacOptions::default()
        };
        let (_, mask) = fundamental_8point_ransac(&p1, &p2, &opts).unwrap();
        let expected: Vec<bool> = (0..11).map(|i| i < 8).collect();
        assert_eq!(mask, expected);
    }
}
