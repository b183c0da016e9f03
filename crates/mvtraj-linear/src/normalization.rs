//! Hartley normalization of 2D point sets.

use mvtraj_core::{Mat3, Pt2, Real};
use nalgebra::Matrix3xX;

/// Homogeneous normalized points together with their similarity transform.
#[derive(Debug, Clone)]
pub struct NormalizedPoints {
    /// `3 × N` homogeneous coordinates, `points = transform * [x; 1]`.
    pub points: Matrix3xX<Real>,
    pub transform: Mat3,
}

impl NormalizedPoints {
    pub fn len(&self) -> usize {
        self.points.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.points.ncols() == 0
    }

    /// Euclidean view of column `i`.
    pub fn point(&self, i: usize) -> Pt2 {
        let c = self.points.column(i);
        Pt2::new(c[0] / c[2], c[1] / c[2])
    }
}

/// Translate points so their centroid is the origin and scale them so the
/// mean distance to the origin is `sqrt(2)`.
///
/// Returns `None` for an empty set or when every point coincides.
pub fn normalize_points_2d(pts: &[Pt2]) -> Option<NormalizedPoints> {
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as Real;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;
    if mean_dist <= Real::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let transform = Mat3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let points = Matrix3xX::from_iterator(
        pts.len(),
        pts.iter()
            .flat_map(|p| [s * (p.x - cx), s * (p.y - cy), 1.0]),
    );
    Some(NormalizedPoints { points, transform })
}
