use nalgebra::{Matrix3, Point2, RealField, Vector3};
use serde::{Deserialize, Serialize};

/// Intrinsics that map normalized image coordinates to pixel coordinates.
pub trait IntrinsicsModel<S: RealField + Copy> {
    /// Convert normalized coordinates (`x/z`, `y/z`) into pixel coordinates.
    fn normalized_to_pixel(&self, n: &Point2<S>) -> Point2<S>;
    /// Convert pixel coordinates into normalized coordinates.
    fn pixel_to_normalized(&self, pixel: &Point2<S>) -> Point2<S>;
}

/// Standard pinhole intrinsics with optional skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FxFyCxCySkew<S: RealField + Copy> {
    /// Focal length in pixels along X.
    pub fx: S,
    /// Focal length in pixels along Y.
    pub fy: S,
    /// Principal point X coordinate in pixels.
    pub cx: S,
    /// Principal point Y coordinate in pixels.
    pub cy: S,
    /// Skew term (typically 0).
    pub skew: S,
}

impl<S: RealField + Copy> FxFyCxCySkew<S> {
    /// Return the 3x3 camera intrinsics matrix K.
    pub fn k_matrix(&self) -> Matrix3<S> {
        Matrix3::new(
            self.fx,
            self.skew,
            self.cx,
            S::zero(),
            self.fy,
            self.cy,
            S::zero(),
            S::zero(),
            S::one(),
        )
    }

    /// Project a point given in camera coordinates.
    ///
    /// Returns `None` for points at or behind the camera center.
    pub fn project(&self, pc: &Vector3<S>) -> Option<Point2<S>> {
        if pc.z <= S::default_epsilon() {
            return None;
        }
        let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
        Some(self.normalized_to_pixel(&n))
    }
}

impl<S: RealField + Copy> IntrinsicsModel<S> for FxFyCxCySkew<S> {
    fn normalized_to_pixel(&self, n: &Point2<S>) -> Point2<S> {
        let u = self.fx * n.x + self.skew * n.y + self.cx;
        let v = self.fy * n.y + self.cy;
        Point2::new(u, v)
    }

    fn pixel_to_normalized(&self, pixel: &Point2<S>) -> Point2<S> {
        let ny = (pixel.y - self.cy) / self.fy;
        let nx = (pixel.x - self.cx - self.skew * ny) / self.fx;
        Point2::new(nx, ny)
    }
}
