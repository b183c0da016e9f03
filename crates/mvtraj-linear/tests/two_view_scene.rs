//! Two-view initialization on a synthetic multi-camera scene.

use mvtraj_core::synthetic::{DetectionNoise, SceneOptions, SyntheticCamera, SyntheticScene};
use mvtraj_core::{IntrinsicsModel, Mat34, Pt2, RansacOptions, RansacVariant, Real};
use mvtraj_linear::epipolar::{
    essential_from_fundamental, fundamental_8point_ransac, recover_relative_pose,
};
use mvtraj_linear::triangulation::triangulate_point_linear;

struct Pairs {
    p1: Vec<Pt2>,
    p2: Vec<Pt2>,
    times: Vec<Real>,
    /// Neither detection was displaced on purpose.
    clean: Vec<bool>,
}

/// Pixel pairs observed at identical global times.
fn synchronized_pairs(a: &SyntheticCamera, b: &SyntheticCamera) -> Pairs {
    let mut pairs = Pairs {
        p1: Vec::new(),
        p2: Vec::new(),
        times: Vec::new(),
        clean: Vec::new(),
    };
    for (ia, da) in a.detections.iter().enumerate() {
        let t = a.time.to_global(da.frame);
        if let Some(ib) = b
            .detections
            .iter()
            .position(|db| (b.time.to_global(db.frame) - t).abs() < 1e-9)
        {
            pairs.p1.push(da.pixel);
            pairs.p2.push(b.detections[ib].pixel);
            pairs.times.push(t);
            pairs
                .clean
                .push(!a.outliers.contains(&ia) && !b.outliers.contains(&ib));
        }
    }
    pairs
}

#[test]
fn robust_two_view_recovers_relative_pose_and_structure() {
    let scene = SyntheticScene::generate(&SceneOptions {
        noise: DetectionNoise {
            outlier_ratio: 0.1,
            ..DetectionNoise::default()
        },
        ..SceneOptions::default()
    });
    let (a, b) = (&scene.cameras[0], &scene.cameras[1]);
    let Pairs {
        p1,
        p2,
        times,
        clean,
    } = synchronized_pairs(a, b);
    assert!(p1.len() > 150, "only {} synchronized pairs", p1.len());

    let opts = RansacOptions {
        max_iters: 1500,
        thresh: 1.0,
        min_inliers: 50,
        seed: 3,
        variant: RansacVariant::LocalOptimization,
        ..RansacOptions::default()
    };
    let (f, mask) = fundamental_8point_ransac(&p1, &p2, &opts).expect("consensus");
    let inliers = mask.iter().filter(|m| **m).count();
    assert!(inliers as Real > 0.7 * p1.len() as Real, "{inliers} inliers");

    let k1 = a.intrinsics.k_matrix();
    let k2 = b.intrinsics.k_matrix();
    let e = essential_from_fundamental(&f, &k1, &k2).unwrap();

    let (n1, n2): (Vec<Pt2>, Vec<Pt2>) = p1
        .iter()
        .zip(&p2)
        .zip(&mask)
        .filter(|(_, m)| **m)
        .map(|((x1, x2), _)| {
            (
                a.intrinsics.pixel_to_normalized(x1),
                b.intrinsics.pixel_to_normalized(x2),
            )
        })
        .unzip();
    let rel = recover_relative_pose(&e, &n1, &n2).unwrap();

    let gt = b.camera_se3_world * a.camera_se3_world.inverse();
    let r_err = rel.pose.rotation.angle_to(&gt.rotation);
    let t_dir = gt.translation.vector.normalize();
    let t_err = (rel.pose.translation.vector - t_dir).norm();
    assert!(r_err < 1e-3, "rotation error {r_err}");
    assert!(t_err < 1e-3, "translation direction error {t_err}");

    // Structure is recovered up to the baseline scale.
    let scale = gt.translation.vector.norm();
    let cam1 = Mat34::identity();
    let mut cam2 = Mat34::zeros();
    cam2.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(rel.pose.rotation.to_rotation_matrix().matrix());
    cam2.fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&rel.pose.translation.vector);

    for i in (0..p1.len()).filter(|&i| clean[i]) {
        assert!(mask[i], "clean pair {i} rejected by RANSAC");
        let x1 = a.intrinsics.pixel_to_normalized(&p1[i]);
        let x2 = b.intrinsics.pixel_to_normalized(&p2[i]);
        let t = times[i];
        let x = triangulate_point_linear(&[cam1, cam2], &[x1, x2]).unwrap();
        let expected = a
            .camera_se3_world
            .transform_point(&mvtraj_core::synthetic::curve_point(t));
        let err = (x.coords * scale - expected.coords).norm();
        assert!(err < 1e-2, "point at t={t} off by {err}");
    }
}
