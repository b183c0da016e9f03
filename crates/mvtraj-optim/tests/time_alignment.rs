use mvtraj_core::synthetic::{SceneOptions, SyntheticScene};
use mvtraj_core::{BSplineTrajectory, Real, TimeModel};
use mvtraj_optim::spline_fit::{SplineFitOptions, fit_smoothing_spline};
use mvtraj_optim::time_align::{
    PosedCamera, SyncSearchOptions, TimeAlignOptions, align_to_trajectory, search_time_offset,
};

const REFERENCE_FPS: Real = 30.0;

fn ground_truth_spline(scene: &SyntheticScene) -> BSplineTrajectory {
    let times: Vec<Real> = (0..=240).map(|i| i as Real).collect();
    let opts = SplineFitOptions {
        smooth_factor: 1e-6,
        ..Default::default()
    };
    fit_smoothing_spline(&scene.ground_truth(&times), &opts)
        .expect("spline fit")
        .0
}

#[test]
fn trajectory_alignment_recovers_injected_offset_and_scale() {
    let scene = SyntheticScene::generate(&SceneOptions::default());
    let spline = ground_truth_spline(&scene);

    for (idx, cam) in scene.cameras.iter().enumerate().skip(1) {
        let prior = TimeModel::from_frame_rates(REFERENCE_FPS, cam.fps);
        let posed = PosedCamera {
            intrinsics: &cam.intrinsics,
            camera_se3_world: &cam.camera_se3_world,
            rs: 0.0,
        };
        let res = align_to_trajectory(
            posed,
            &prior,
            &cam.detections,
            &spline,
            &TimeAlignOptions::default(),
        )
        .expect("alignment succeeds on clean data");

        // One local frame lasts `alpha` global frames.
        let frame_interval = cam.time.alpha;
        assert!(
            (res.model.beta - cam.time.beta).abs() < 0.01 * frame_interval,
            "camera {idx}: beta {} vs {}",
            res.model.beta,
            cam.time.beta
        );
        assert!(
            (res.model.alpha - cam.time.alpha).abs() < 1e-4 * cam.time.alpha,
            "camera {idx}: alpha {} vs {}",
            res.model.alpha,
            cam.time.alpha
        );
        assert!(
            res.inliers.len() as Real > 0.9 * cam.detections.len() as Real,
            "camera {idx}: only {} of {} detections consistent",
            res.inliers.len(),
            cam.detections.len()
        );
    }
}

#[test]
fn offset_only_alignment_keeps_prior_scale() {
    let scene = SyntheticScene::generate(&SceneOptions::default());
    let spline = ground_truth_spline(&scene);
    let cam = &scene.cameras[1];
    let prior = TimeModel::new(cam.time.alpha, 0.0);
    let opts = TimeAlignOptions {
        estimate_scale: false,
        ..Default::default()
    };
    let res = align_to_trajectory(
        PosedCamera {
            intrinsics: &cam.intrinsics,
            camera_se3_world: &cam.camera_se3_world,
            rs: 0.0,
        },
        &prior,
        &cam.detections,
        &spline,
        &opts,
    )
    .unwrap();
    assert_eq!(res.model.alpha, cam.time.alpha);
    assert!((res.model.beta - cam.time.beta).abs() < 0.01);
}

#[test]
fn epipolar_search_finds_offset_against_reference() {
    let scene = SyntheticScene::generate(&SceneOptions::default());
    let reference = &scene.cameras[0];
    let opts = SyncSearchOptions {
        min_offset: -20.0,
        max_offset: 20.0,
        ..Default::default()
    };

    for idx in [1, 2] {
        let cam = &scene.cameras[idx];
        let prior = TimeModel::from_frame_rates(REFERENCE_FPS, cam.fps);
        let found = search_time_offset(
            &reference.detections,
            &reference.time,
            &cam.detections,
            &prior,
            &opts,
        )
        .expect("offset search");
        assert!(
            (found.beta - cam.time.beta).abs() < 0.1,
            "camera {idx}: beta {} vs {}",
            found.beta,
            cam.time.beta
        );
        assert!(found.inliers as Real > 0.9 * found.pairs as Real);
    }
}
