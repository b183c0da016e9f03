//! Step functions of the incremental reconstruction.
//!
//! Each step validates the session, reads the current state and writes its
//! results back before returning. [`run_reconstruction`] chains them into
//! the full state machine.

use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, warn};
use mvtraj_core::{
    BSplineTrajectory, Detection, Estimator, IntrinsicsModel, Iso3, Mat34, Pt2, Pt3,
    RansacOptions, Real, TimeModel, TrajectorySample, projection_matrix, ransac_fit,
};
use mvtraj_linear::EpipolarError;
use mvtraj_linear::epipolar::{
    FundamentalEstimator, essential_8point, fundamental_8point_ransac, recover_relative_pose,
};
use mvtraj_linear::pnp::{PnpDatum, PnpEstimator};
use mvtraj_linear::triangulation::{max_reprojection_error, triangulate_point_linear};
use mvtraj_optim::bundle::{BundleCamera, bundle_adjust};
use mvtraj_optim::spline_fit::fit_smoothing_spline;
use mvtraj_optim::time_align::{
    PosedCamera, SyncSearchOptions, align_to_trajectory, global_track, interpolate_track,
    search_time_offset,
};
use rayon::prelude::*;

use crate::ReconstructionError;
use crate::session::ReconstructionSession;

use super::config::{ReconstructionConfig, SelectionStrategy};
use super::outliers::flag_outliers;
use super::problem::{CameraOutput, ReconstructionInput, ReconstructionOutput, ReconstructionProblem};
use super::selection::candidate_order;
use super::smoothing::ConstantPositionKalman;
use super::state::{
    CameraState, EventKind, Phase, ReconstructionEvent, ReconstructionState, Trajectory,
};

type Session = ReconstructionSession<ReconstructionProblem>;

// ─────────────────────────────────────────────────────────────────────────────
// Step Options
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Override `cut_detection_second`.
    pub cut_detection_second: Option<Real>,
}

#[derive(Debug, Clone, Default)]
pub struct TimeShiftOptions {
    /// Run the search with these settings even if `time_shift` is off.
    pub search: Option<SyncSearchOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Force the initial camera pair.
    pub pair: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct BundleAdjustOptions {
    pub max_iters: Option<usize>,
    pub rolling_shutter: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct OutlierOptions {
    /// Override `thres_outlier`.
    pub threshold: Option<Real>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub strategy: Option<SelectionStrategy>,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Override `refine_time`.
    pub refine_time: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct TriangulateOptions {
    /// Override `thres_triangulation`.
    pub threshold: Option<Real>,
}

#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    /// Override `kalman_smoothing`.
    pub kalman_smoothing: Option<bool>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn prepare_state(input: &ReconstructionInput, cut_seconds: Option<Real>) -> ReconstructionState {
    let reference = input.reference_camera;
    let fps_ref = input.cameras[reference].fps;

    let cameras = input
        .cameras
        .iter()
        .enumerate()
        .map(|(i, cam)| {
            let mut detections: Vec<Detection> = cam
                .detections
                .iter()
                .copied()
                .filter(|d| match cut_seconds {
                    Some(s) if s > 0.0 => d.frame <= s * cam.fps,
                    _ => true,
                })
                .collect();
            detections.sort_by(|a, b| a.frame.total_cmp(&b.frame));

            let time = if i == reference {
                TimeModel::identity()
            } else {
                cam.time_prior
                    .unwrap_or_else(|| TimeModel::from_frame_rates(fps_ref, cam.fps))
            };
            CameraState {
                name: if cam.name.is_empty() {
                    format!("cam{i}")
                } else {
                    cam.name.clone()
                },
                intrinsics: cam.intrinsics,
                fps: cam.fps,
                resolution: cam.resolution,
                detections,
                pose: None,
                time,
                rs: 0.0,
                time_prior: cam.time_prior,
            }
        })
        .collect();

    ReconstructionState {
        cameras,
        reference,
        ..Default::default()
    }
}

fn require_trajectory(state: &ReconstructionState) -> Result<&Trajectory> {
    state
        .trajectory
        .as_ref()
        .ok_or_else(|| anyhow!("trajectory initialization required"))
}

/// A detection of the second camera paired with the first camera's pixel
/// interpolated at the same global time.
#[derive(Debug, Clone, Copy)]
struct PairMatch {
    time: Real,
    x1: Pt2,
    x2: Pt2,
}

fn match_cameras(first: &CameraState, second: &CameraState, max_gap: Real) -> Vec<PairMatch> {
    let track = global_track(&first.detections, &first.time, first.rs);
    second
        .detections
        .iter()
        .filter(|d| d.valid)
        .filter_map(|d| {
            let time = second.capture_time(d);
            let x1 = interpolate_track(&track, time, max_gap)?;
            Some(PairMatch {
                time,
                x1,
                x2: d.pixel,
            })
        })
        .collect()
}

/// First two cameras: the configured sequence, or the reference camera and
/// the camera sharing most correspondences with it.
fn initial_pair(
    state: &ReconstructionState,
    config: &ReconstructionConfig,
) -> Result<(usize, usize)> {
    if let &[a, b, ..] = config.camera_sequence.as_slice() {
        return Ok((a, b));
    }
    let first = state.reference;
    let max_gap = config.sync_search.max_interp_gap;
    let (second, _) = (0..state.cameras.len())
        .filter(|&c| c != first)
        .map(|c| {
            (
                c,
                match_cameras(&state.cameras[first], &state.cameras[c], max_gap).len(),
            )
        })
        .fold(None, |best: Option<(usize, usize)>, (c, n)| match best {
            Some((_, bn)) if bn >= n => best,
            _ => Some((c, n)),
        })
        .ok_or(ReconstructionError::NoCameraToRegister)?;
    Ok((first, second))
}

fn epipolar_failure(first: usize, second: usize, err: EpipolarError) -> ReconstructionError {
    match err {
        EpipolarError::InsufficientCorrespondences { needed, got } => {
            ReconstructionError::InsufficientCorrespondences {
                first,
                second,
                needed,
                got,
            }
        }
        other => ReconstructionError::DegenerateModel(format!(
            "cameras {first} and {second}: {other}"
        )),
    }
}

/// One observation of a point to triangulate.
#[derive(Debug, Clone, Copy)]
struct View {
    projection: Mat34,
    camera_se3_world: Iso3,
    pixel: Pt2,
}

impl View {
    fn new(camera: &CameraState, camera_se3_world: Iso3, pixel: Pt2) -> Self {
        Self {
            projection: projection_matrix(&camera.intrinsics.k_matrix(), &camera_se3_world),
            camera_se3_world,
            pixel,
        }
    }
}

/// Linear triangulation kept only when the point lies in front of every
/// camera and reprojects within `threshold` pixels in all views.
fn triangulate_gated(views: &[View], threshold: Real) -> Option<Pt3> {
    let (cameras, pixels): (Vec<Mat34>, Vec<Pt2>) =
        views.iter().map(|v| (v.projection, v.pixel)).unzip();
    let x = triangulate_point_linear(&cameras, &pixels).ok()?;
    if views
        .iter()
        .any(|v| v.camera_se3_world.transform_point(&x).z <= 0.0)
    {
        return None;
    }
    (max_reprojection_error(&cameras, &pixels, &x)? <= threshold).then_some(x)
}

struct PoseFit {
    pose: Iso3,
    inliers: usize,
}

/// PnP of a camera against the trajectory evaluated at its detection times.
fn estimate_pose(
    index: usize,
    camera: &CameraState,
    spline: &BSplineTrajectory,
    opts: &RansacOptions,
) -> Result<PoseFit, ReconstructionError> {
    let data: Vec<PnpDatum> = camera
        .detections
        .iter()
        .filter(|d| d.valid)
        .filter_map(|d| {
            let world = spline.evaluate(camera.capture_time(d))?;
            Some(PnpDatum {
                world,
                image: d.pixel,
                k: camera.intrinsics,
            })
        })
        .collect();
    let required = opts.min_inliers.max(PnpEstimator::MIN_SAMPLES);
    let res = ransac_fit::<PnpEstimator>(&data, opts);
    debug!(
        "camera {index}: pnp on {} correspondences, {} inliers",
        data.len(),
        res.inliers.len()
    );
    match res.model {
        Some(pose) if res.success => Ok(PoseFit {
            pose,
            inliers: res.inliers.len(),
        }),
        _ => Err(ReconstructionError::RegistrationFailure {
            camera: index,
            inliers: res.inliers.len(),
            required,
        }),
    }
}

/// Time refinement against the trajectory followed by a second PnP.
///
/// The refined time is kept only when the new pose has at least as many
/// inliers as `fit`.
fn refine_time(
    index: usize,
    camera: &CameraState,
    fit: &PoseFit,
    spline: &BSplineTrajectory,
    config: &ReconstructionConfig,
) -> Option<(TimeModel, PoseFit)> {
    let posed = PosedCamera {
        intrinsics: &camera.intrinsics,
        camera_se3_world: &fit.pose,
        rs: camera.rs,
    };
    let alignment = match align_to_trajectory(
        posed,
        &camera.time,
        &camera.detections,
        spline,
        &config.time_align,
    ) {
        Ok(a) => a,
        Err(err) => {
            warn!("camera {index}: time refinement failed, keeping the current model: {err:#}");
            return None;
        }
    };
    let mut trial = camera.clone();
    trial.time = alignment.model;
    match estimate_pose(index, &trial, spline, &config.pnp_ransac()) {
        Ok(refit) if refit.inliers >= fit.inliers => Some((alignment.model, refit)),
        _ => {
            debug!("camera {index}: refined time model rejected");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Build the camera states from the input.
///
/// Truncates detections to the first `cut_detection_second` seconds, puts the
/// reference camera on the identity time model and gives every other camera
/// its `time_prior` or the frame-rate prior `alpha = fps_ref / fps`.
pub fn step_prepare(session: &mut Session, opts: Option<PrepareOptions>) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let cut = opts
        .cut_detection_second
        .or(session.config.cut_detection_second);

    let state = prepare_state(session.require_input()?, cut);
    let kept: usize = state.cameras.iter().map(|c| c.detections.len()).sum();

    session.reset_state();
    session.state = state;
    session.log_success_with_notes(
        "prepare",
        format!(
            "{} cameras, {kept} detections",
            session.state.cameras.len()
        ),
    );
    Ok(())
}

/// Estimate each camera's time offset against the reference camera.
///
/// Cameras with a `time_prior` are left alone. A failed search keeps the
/// prior and is logged.
pub fn step_time_shift(session: &mut Session, opts: Option<TimeShiftOptions>) -> Result<()> {
    session.validate()?;
    ensure!(
        !session.state.cameras.is_empty(),
        "prepare step required before the offset search"
    );
    let opts = opts.unwrap_or_default();
    if !session.config.time_shift && opts.search.is_none() {
        debug!("offset search disabled");
        return Ok(());
    }
    let search = opts
        .search
        .unwrap_or_else(|| session.config.sync_search.clone());

    let state = &mut session.state;
    let reference = state.reference;
    let mut shifted = 0;
    for c in 0..state.cameras.len() {
        if c == reference || state.cameras[c].time_prior.is_some() {
            continue;
        }
        let (ref_cam, cam) = (&state.cameras[reference], &state.cameras[c]);
        match search_time_offset(
            &ref_cam.detections,
            &ref_cam.time,
            &cam.detections,
            &cam.time,
            &search,
        ) {
            Ok(score) => {
                state.cameras[c].time.beta = score.beta;
                let mut event = ReconstructionEvent::new(EventKind::TimeShift, Some(c), 0);
                event.inliers = Some(score.inliers);
                event.note = Some(format!("beta {:.3} from {} pairs", score.beta, score.pairs));
                state.emit(event);
                shifted += 1;
            }
            Err(err) => warn!("camera {c}: offset search failed, keeping the prior: {err:#}"),
        }
    }

    session.log_success_with_notes("time_shift", format!("{shifted} cameras shifted"));
    Ok(())
}

/// Two-view initialization of poses and trajectory.
///
/// Matches the pair's detections in global time, estimates `F` robustly, the
/// essential matrix and the relative pose on the inliers, triangulates, drops
/// points above `thres_triangulation` and fits the spline. The first camera
/// of the pair defines the world frame and the baseline has unit length.
pub fn step_init_trajectory(session: &mut Session, opts: Option<InitOptions>) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let config = session.config.clone();
    let state = &session.state;
    let n = state.cameras.len();
    ensure!(n >= 2, "prepare step required before initialization");

    let (a, b) = match opts.pair {
        Some(pair) => pair,
        None => initial_pair(state, &config)?,
    };
    ensure!(a != b && a < n && b < n, "invalid initial pair ({a}, {b})");
    let (cam_a, cam_b) = (&state.cameras[a], &state.cameras[b]);

    let matches = match_cameras(cam_a, cam_b, config.sync_search.max_interp_gap);
    let needed = FundamentalEstimator::MIN_SAMPLES.max(config.ransac.min_inliers);
    if matches.len() < needed {
        return Err(ReconstructionError::InsufficientCorrespondences {
            first: a,
            second: b,
            needed,
            got: matches.len(),
        }
        .into());
    }

    let (pts1, pts2): (Vec<Pt2>, Vec<Pt2>) = matches.iter().map(|m| (m.x1, m.x2)).unzip();
    let (_, mask) = fundamental_8point_ransac(&pts1, &pts2, &config.fundamental_ransac())
        .map_err(|e| epipolar_failure(a, b, e))?;
    let inliers: Vec<PairMatch> = matches
        .iter()
        .zip(&mask)
        .filter_map(|(m, &ok)| ok.then_some(*m))
        .collect();

    let n1: Vec<Pt2> = inliers
        .iter()
        .map(|m| cam_a.intrinsics.pixel_to_normalized(&m.x1))
        .collect();
    let n2: Vec<Pt2> = inliers
        .iter()
        .map(|m| cam_b.intrinsics.pixel_to_normalized(&m.x2))
        .collect();
    let e = essential_8point(&n1, &n2).map_err(|e| epipolar_failure(a, b, e))?;
    let relative = recover_relative_pose(&e, &n1, &n2).map_err(|e| epipolar_failure(a, b, e))?;

    let pose_a = Iso3::identity();
    let pose_b = relative.pose;
    let samples: Vec<TrajectorySample> = inliers
        .par_iter()
        .filter_map(|m| {
            let views = [View::new(cam_a, pose_a, m.x1), View::new(cam_b, pose_b, m.x2)];
            triangulate_gated(&views, config.thres_triangulation)
                .map(|x| TrajectorySample::new(m.time, x))
        })
        .collect();
    if samples.len() < needed {
        return Err(ReconstructionError::DegenerateModel(format!(
            "only {} of {} inliers triangulate within {} px",
            samples.len(),
            inliers.len(),
            config.thres_triangulation
        ))
        .into());
    }

    let (spline, report) = fit_smoothing_spline(&samples, &config.spline_fit_opts())
        .context("initial spline fit failed")?;
    debug!(
        "initial spline: {} segments, fit rms {:.4}, max {:.4}",
        report.num_segments, report.rms, report.max_residual
    );

    let state = &mut session.state;
    state.cameras[a].pose = Some(pose_a);
    state.cameras[b].pose = Some(pose_b);
    state.sequence = vec![a, b];
    state.trajectory = Some(Trajectory {
        samples: spline.resample(config.sampling_rate),
        spline,
    });
    state.phase = Phase::Registering;

    let mut event = ReconstructionEvent::new(EventKind::Initialized, Some(b), 2);
    event.inliers = Some(inliers.len());
    event.note = Some(format!(
        "pair ({a}, {b}), {} of {} matches consistent, {} points",
        inliers.len(),
        matches.len(),
        samples.len()
    ));
    state.emit(event);

    session.log_success_with_notes(
        "init_trajectory",
        format!("pair ({a}, {b}), {} points", samples.len()),
    );
    Ok(())
}

/// Jointly refine the registered cameras and the trajectory.
///
/// The first camera of the sequence keeps its pose and the time anchor its
/// time model. Non-convergence is logged as a warning event and the best
/// parameters are kept.
pub fn step_bundle_adjust(session: &mut Session, opts: Option<BundleAdjustOptions>) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let mut ba_opts = session.config.bundle_opts();
    if let Some(max_iters) = opts.max_iters {
        ba_opts.solve.max_iters = max_iters;
    }
    if let Some(rs) = opts.rolling_shutter {
        ba_opts.rolling_shutter = rs;
    }

    let state = &session.state;
    let trajectory = require_trajectory(state)?;
    let anchor = state.time_anchor();
    let cameras = state
        .sequence
        .iter()
        .enumerate()
        .map(|(k, &c)| {
            let cam = &state.cameras[c];
            let pose = cam
                .pose
                .ok_or_else(|| anyhow!("registered camera {c} has no pose"))?;
            Ok(BundleCamera {
                intrinsics: cam.intrinsics,
                camera_se3_world: pose,
                time: cam.time,
                rs: cam.rs,
                fix_pose: k == 0,
                fix_time: Some(c) == anchor,
                detections: cam.detections.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let before = state.registered_mean_error();
    let result =
        bundle_adjust(&cameras, &trajectory.spline, &ba_opts).context("bundle adjustment failed")?;

    let state = &mut session.state;
    for (k, estimate) in result.cameras.iter().enumerate() {
        let cam = &mut state.cameras[state.sequence[k]];
        cam.pose = Some(estimate.camera_se3_world);
        cam.time = estimate.time;
        cam.rs = estimate.rs;
    }
    if let Some(trajectory) = state.trajectory.as_mut() {
        trajectory.set_spline(result.spline);
    }
    let after = state.registered_mean_error();

    let registered = state.num_registered();
    let report = &result.report;
    let mut event = ReconstructionEvent::new(EventKind::BundleAdjusted, None, registered);
    event.mean_error_before = before;
    event.mean_error_after = after;
    event.note = Some(format!(
        "rms {:.4} -> {:.4} px, {} observations",
        report.initial_rms, report.final_rms, report.num_observations
    ));
    state.emit(event);
    if !report.converged {
        let mut warning = ReconstructionEvent::new(EventKind::ConvergenceWarning, None, registered);
        warning.mean_error_after = after;
        warning.note = Some(report.termination.clone());
        state.emit(warning);
    }

    session.log_success_with_notes(
        "bundle_adjust",
        match report.evaluations {
            Some(n) => format!(
                "rms {:.4} -> {:.4} px ({n} evaluations)",
                report.initial_rms, report.final_rms
            ),
            None => format!("rms {:.4} -> {:.4} px", report.initial_rms, report.final_rms),
        },
    );
    Ok(())
}

/// Invalidate detections of registered cameras reprojecting worse than
/// `thres_outlier`. Running it twice in a row removes nothing the second time.
pub fn step_remove_outliers(session: &mut Session, opts: Option<OutlierOptions>) -> Result<()> {
    session.validate()?;
    let threshold = opts
        .and_then(|o| o.threshold)
        .unwrap_or(session.config.thres_outlier);
    ensure!(threshold > 0.0, "outlier threshold must be positive");

    let state = &mut session.state;
    let spline = require_trajectory(state)?.spline.clone();
    let registered = state.num_registered();
    let mut total = 0;
    for c in state.sequence.clone() {
        let removed = flag_outliers(&mut state.cameras[c], &spline, threshold);
        let mut event = ReconstructionEvent::new(EventKind::OutliersRemoved, Some(c), registered);
        event.removed = Some(removed);
        state.emit(event);
        total += removed;
    }

    session.log_success_with_notes("remove_outliers", format!("{total} detections removed"));
    Ok(())
}

/// Pick the next camera to register.
///
/// Fails with [`ReconstructionError::NoCameraToRegister`] when every
/// candidate is already registered.
pub fn step_select_camera(session: &mut Session, opts: Option<SelectOptions>) -> Result<()> {
    session.validate()?;
    require_trajectory(&session.state)?;
    let mut config = session.config.clone();
    if let Some(strategy) = opts.and_then(|o| o.strategy) {
        config.selection = strategy;
    }

    let order = candidate_order(&session.state, &config);
    let Some(&next) = order.first() else {
        return Err(ReconstructionError::NoCameraToRegister.into());
    };
    debug!("next camera {next} (candidates {order:?})");
    session.state.pending = Some(next);
    Ok(())
}

/// Register the selected camera against the trajectory.
///
/// PnP RANSAC on detections paired with trajectory points at their mapped
/// times, followed by time refinement. Too few inliers is a
/// [`ReconstructionError::RegistrationFailure`] unless `registration_fallback`
/// finds another camera that registers.
pub fn step_register_camera(session: &mut Session, opts: Option<RegisterOptions>) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let config = session.config.clone();
    let refine = opts.refine_time.unwrap_or(config.refine_time);
    let pending = session
        .state
        .pending
        .ok_or_else(|| anyhow!("select a camera before registration"))?;
    let spline = require_trajectory(&session.state)?.spline.clone();

    let mut candidates = vec![pending];
    if config.registration_fallback {
        candidates.extend(
            candidate_order(&session.state, &config)
                .into_iter()
                .filter(|&c| c != pending),
        );
    }

    let pnp = config.pnp_ransac();
    let mut first_failure = None;
    for c in candidates {
        let fit = match estimate_pose(c, &session.state.cameras[c], &spline, &pnp) {
            Ok(fit) => fit,
            Err(failure) => {
                let registered = session.state.num_registered();
                let mut event =
                    ReconstructionEvent::new(EventKind::RegistrationFailed, Some(c), registered);
                if let ReconstructionError::RegistrationFailure { inliers, .. } = failure {
                    event.inliers = Some(inliers);
                }
                session.state.emit(event);
                warn!("{failure}");
                if first_failure.is_none() {
                    first_failure = Some(failure);
                }
                continue;
            }
        };

        let camera = &session.state.cameras[c];
        let refined = if refine {
            refine_time(c, camera, &fit, &spline, &config)
        } else {
            None
        };

        let state = &mut session.state;
        let registered = state.num_registered() + 1;
        let fit = match refined {
            Some((time, refit)) => {
                let old = state.cameras[c].time;
                state.cameras[c].time = time;
                let mut event = ReconstructionEvent::new(EventKind::TimeRefined, Some(c), registered);
                event.note = Some(format!(
                    "alpha {:.6} -> {:.6}, beta {:.3} -> {:.3}",
                    old.alpha, time.alpha, old.beta, time.beta
                ));
                state.emit(event);
                refit
            }
            None => fit,
        };
        state.cameras[c].pose = Some(fit.pose);
        state.sequence.push(c);
        state.pending = None;

        let mut event = ReconstructionEvent::new(EventKind::Registered, Some(c), registered);
        event.inliers = Some(fit.inliers);
        state.emit(event);

        session.log_success_with_notes(
            "register_camera",
            format!("camera {c}, {} inliers", fit.inliers),
        );
        return Ok(());
    }

    session.state.pending = None;
    let failure = first_failure.unwrap_or(ReconstructionError::NoCameraToRegister);
    session.log_failure("register_camera", failure.to_string());
    Err(failure.into())
}

/// Triangulate the global times the newest camera adds to the trajectory.
///
/// Its detections outside the current trajectory are paired with the other
/// registered cameras' detections interpolated at the same time. Accepted
/// points are merged into the discrete trajectory, the spline is refit and
/// resampled at `sampling_rate`.
pub fn step_triangulate(session: &mut Session, opts: Option<TriangulateOptions>) -> Result<()> {
    session.validate()?;
    let config = session.config.clone();
    let threshold = opts
        .and_then(|o| o.threshold)
        .unwrap_or(config.thres_triangulation);

    let state = &session.state;
    let trajectory = require_trajectory(state)?;
    let &newest = state
        .sequence
        .last()
        .ok_or_else(|| anyhow!("no registered camera"))?;
    let max_gap = config.sync_search.max_interp_gap;

    let others = state
        .sequence
        .iter()
        .filter(|&&c| c != newest)
        .map(|&c| {
            let cam = &state.cameras[c];
            let pose = cam
                .pose
                .ok_or_else(|| anyhow!("registered camera {c} has no pose"))?;
            Ok((cam, pose, global_track(&cam.detections, &cam.time, cam.rs)))
        })
        .collect::<Result<Vec<_>>>()?;

    let cam = &state.cameras[newest];
    let pose = cam
        .pose
        .ok_or_else(|| anyhow!("camera {newest} is not registered"))?;
    let fresh: Vec<TrajectorySample> = cam
        .detections
        .par_iter()
        .filter(|d| d.valid)
        .filter_map(|d| {
            let t = cam.capture_time(d);
            if trajectory.spline.covers(t) {
                return None;
            }
            let mut views = vec![View::new(cam, pose, d.pixel)];
            views.extend(others.iter().filter_map(|(other, pose, track)| {
                interpolate_track(track, t, max_gap).map(|x| View::new(other, *pose, x))
            }));
            if views.len() < 2 {
                return None;
            }
            triangulate_gated(&views, threshold).map(|x| TrajectorySample::new(t, x))
        })
        .collect();

    let added = fresh.len();
    let updated = if added > 0 {
        let mut merged = trajectory.samples.clone();
        merged.extend(fresh);
        merged.sort_by(|a, b| a.time.total_cmp(&b.time));
        merged.dedup_by(|later, earlier| (later.time - earlier.time).abs() < 1e-9);
        let (spline, report) = fit_smoothing_spline(&merged, &config.spline_fit_opts())
            .context("spline refit failed")?;
        debug!(
            "refit: {} samples, {} segments, rms {:.4}",
            report.num_samples, report.num_segments, report.rms
        );
        Some(Trajectory {
            samples: spline.resample(config.sampling_rate),
            spline,
        })
    } else {
        None
    };

    let state = &mut session.state;
    if let Some(trajectory) = updated {
        state.trajectory = Some(trajectory);
    }
    let mut event =
        ReconstructionEvent::new(EventKind::Triangulated, Some(newest), state.num_registered());
    event.inliers = Some(added);
    state.emit(event);

    session.log_success_with_notes("triangulate", format!("camera {newest}, {added} new points"));
    Ok(())
}

/// Resample the trajectory at every global frame and publish the output.
pub fn step_finalize(session: &mut Session, opts: Option<FinalizeOptions>) -> Result<()> {
    session.validate()?;
    let smooth = opts
        .and_then(|o| o.kalman_smoothing)
        .unwrap_or(session.config.kalman_smoothing);
    let ground_truth = session.config.ground_truth.clone();

    let state = &mut session.state;
    ensure!(
        state.num_registered() >= 2,
        "at least two registered cameras required"
    );
    let spline = require_trajectory(state)?.spline.clone();
    let samples = spline.resample(1.0);
    let published = if smooth {
        ConstantPositionKalman::default().filter_runs(&samples, 1.5)
    } else {
        samples.clone()
    };
    state.trajectory = Some(Trajectory {
        samples,
        spline: spline.clone(),
    });
    state.phase = Phase::Done;

    let cameras = state
        .cameras
        .iter()
        .zip(state.mean_errors())
        .map(|(c, mean_error)| CameraOutput {
            name: c.name.clone(),
            intrinsics: c.intrinsics,
            camera_se3_world: c.pose,
            time: c.time,
            rs: c.rs,
            mean_error,
            valid_detections: c.num_valid(),
        })
        .collect();
    let output = ReconstructionOutput {
        trajectory: published,
        spline,
        sequence: state.sequence.clone(),
        cameras,
        ground_truth,
    };

    let mut event = ReconstructionEvent::new(EventKind::Finalized, None, state.num_registered());
    event.mean_error_after = state.registered_mean_error();
    event.note = Some(format!("{} samples", output.trajectory.len()));
    state.emit(event);

    let notes = format!(
        "{} cameras registered, {} samples",
        output.sequence.len(),
        output.trajectory.len()
    );
    session.set_output(output);
    session.log_success_with_notes("finalize", notes);
    Ok(())
}

/// Run the full incremental reconstruction.
///
/// Registers cameras until all cameras, or all cameras of an explicit
/// `camera_sequence`, are in. Each round adjusts, removes outliers and
/// adjusts again before the next camera is added.
pub fn run_reconstruction(session: &mut Session) -> Result<()> {
    step_prepare(session, None)?;
    step_time_shift(session, None)?;
    step_init_trajectory(session, None)?;

    let target = if session.config.camera_sequence.is_empty() {
        session.state.cameras.len()
    } else {
        session.config.camera_sequence.len()
    };
    loop {
        step_bundle_adjust(session, None)?;
        step_remove_outliers(session, None)?;
        step_bundle_adjust(session, None)?;
        if session.state.num_registered() >= target {
            break;
        }
        step_select_camera(session, None)?;
        step_register_camera(session, None)?;
        step_triangulate(session, None)?;
    }

    step_finalize(session, None)
}
