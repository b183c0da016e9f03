use nalgebra::{
    Isometry3, Matrix3, Matrix3x4, Matrix4, Point2, Point3, RealField, Vector2, Vector3,
};

/// Every computation runs in double precision.
pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
/// Camera projection matrix `K [R | t]`.
pub type Mat34 = Matrix3x4<Real>;
pub type Mat4 = Matrix4<Real>;
/// World-to-camera rigid transform.
pub type Iso3 = Isometry3<Real>;

/// `(x, y)` to `(x, y, 1)`.
pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Skew-symmetric cross-product matrix `[v]×`.
pub fn skew<T: RealField + Copy>(v: &Vector3<T>) -> Matrix3<T> {
    Matrix3::new(
        T::zero(),
        -v.z,
        v.y,
        v.z,
        T::zero(),
        -v.x,
        -v.y,
        v.x,
        T::zero(),
    )
}

/// Build `P = K [R | t]` from intrinsics and a world-to-camera pose.
pub fn projection_matrix(k: &Mat3, camera_se3_world: &Iso3) -> Mat34 {
    let mut rt = Mat34::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(camera_se3_world.rotation.to_rotation_matrix().matrix());
    rt.fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&camera_se3_world.translation.vector);
    k * rt
}

/// Project a world point with a 3×4 matrix.
///
/// Returns `None` when the point lies on the camera plane.
pub fn project_with(p: &Mat34, x: &Pt3) -> Option<Pt2> {
    let h = p * x.to_homogeneous();
    if h.z.abs() <= Real::EPSILON {
        return None;
    }
    Some(from_homogeneous(&h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn skew_matches_cross_product() {
        let a = Vec3::new(0.3, -1.2, 2.0);
        let b = Vec3::new(-0.7, 0.4, 0.9);
        let diff = skew(&a) * b - a.cross(&b);
        assert!(diff.norm() < 1e-12, "skew * b != a x b: {diff}");
    }

    #[test]
    fn projection_matrix_agrees_with_pose_transform() {
        let k = Mat3::new(800.0, 0.0, 640.0, 0.0, 780.0, 360.0, 0.0, 0.0, 1.0);
        let pose = Iso3::from_parts(
            Translation3::new(0.1, -0.2, 4.0),
            UnitQuaternion::from_euler_angles(0.1, -0.05, 0.2),
        );
        let x = Pt3::new(0.3, 0.4, 1.0);
        let p = projection_matrix(&k, &pose);
        let uv = project_with(&p, &x).expect("point in front of camera");

        let pc = pose.transform_point(&x);
        let expected = from_homogeneous(&(k * pc.coords));
        assert!((uv - expected).norm() < 1e-9, "got {uv}, expected {expected}");
    }
}
