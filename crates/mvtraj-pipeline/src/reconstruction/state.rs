//! Reconstruction state aggregate.
//!
//! A single owned value threaded through the step functions. Each step reads
//! what it needs and writes its results back before returning.

use log::info;
use mvtraj_core::{
    BSplineTrajectory, Detection, FxFyCxCySkew, Iso3, Real, TimeModel, TrajectorySample,
};
use serde::{Deserialize, Serialize};

use super::outliers::{mean_reprojection_error, reprojection_errors};

/// Per-camera values, mutated in place by registration and adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraState {
    pub name: String,
    pub intrinsics: FxFyCxCySkew<Real>,
    pub fps: Real,
    pub resolution: (u32, u32),
    pub detections: Vec<Detection>,
    /// `camera_se3_world`; unset until the camera is registered.
    pub pose: Option<Iso3>,
    pub time: TimeModel,
    /// Rolling-shutter delay per row, in local frames.
    pub rs: Real,
    /// Time model supplied with the input.
    pub time_prior: Option<TimeModel>,
}

impl CameraState {
    pub fn is_registered(&self) -> bool {
        self.pose.is_some()
    }

    pub fn num_valid(&self) -> usize {
        self.detections.iter().filter(|d| d.valid).count()
    }

    pub fn capture_time(&self, detection: &Detection) -> Real {
        self.time
            .capture_time(detection.frame, detection.pixel.y, self.rs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initializing,
    Registering,
    Done,
}

/// Discrete samples together with the spline fit to them.
///
/// The samples always equal the spline evaluated at their own times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub samples: Vec<TrajectorySample>,
    pub spline: BSplineTrajectory,
}

impl Trajectory {
    /// Replace the spline and re-evaluate it at the times in use.
    pub fn set_spline(&mut self, spline: BSplineTrajectory) {
        let times: Vec<Real> = self.samples.iter().map(|s| s.time).collect();
        self.samples = spline.sample(&times);
        self.spline = spline;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TimeShift,
    Initialized,
    Registered,
    RegistrationFailed,
    TimeRefined,
    Triangulated,
    BundleAdjusted,
    ConvergenceWarning,
    OutliersRemoved,
    Finalized,
}

/// Structured progress record of one reconstruction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionEvent {
    pub kind: EventKind,
    pub camera: Option<usize>,
    /// Registered cameras when the event was emitted.
    pub registered: usize,
    pub mean_error_before: Option<Real>,
    pub mean_error_after: Option<Real>,
    pub inliers: Option<usize>,
    pub removed: Option<usize>,
    pub note: Option<String>,
}

impl ReconstructionEvent {
    pub fn new(kind: EventKind, camera: Option<usize>, registered: usize) -> Self {
        Self {
            kind,
            camera,
            registered,
            mean_error_before: None,
            mean_error_after: None,
            inliers: None,
            removed: None,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconstructionState {
    pub cameras: Vec<CameraState>,
    pub reference: usize,
    /// Registration order.
    pub sequence: Vec<usize>,
    pub trajectory: Option<Trajectory>,
    pub phase: Phase,
    /// Camera chosen by the selection step, consumed by registration.
    pub pending: Option<usize>,
    pub events: Vec<ReconstructionEvent>,
}

impl ReconstructionState {
    /// Append an event and report it through the log.
    pub fn emit(&mut self, event: ReconstructionEvent) {
        let mut line = format!("{:?}", event.kind);
        if let Some(c) = event.camera {
            line.push_str(&format!(" camera={c}"));
        }
        line.push_str(&format!(" registered={}", event.registered));
        if let Some(e) = event.mean_error_before {
            line.push_str(&format!(" error_before={e:.4}"));
        }
        if let Some(e) = event.mean_error_after {
            line.push_str(&format!(" error_after={e:.4}"));
        }
        if let Some(n) = event.inliers {
            line.push_str(&format!(" inliers={n}"));
        }
        if let Some(n) = event.removed {
            line.push_str(&format!(" removed={n}"));
        }
        if let Some(note) = &event.note {
            line.push_str(&format!(" ({note})"));
        }
        info!("{line}");
        self.events.push(event);
    }

    pub fn num_registered(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_registered(&self, camera: usize) -> bool {
        self.sequence.contains(&camera)
    }

    /// Camera whose time model stays fixed during adjustment.
    ///
    /// The reference camera once registered, otherwise the first registered one.
    pub fn time_anchor(&self) -> Option<usize> {
        if self.is_registered(self.reference) {
            Some(self.reference)
        } else {
            self.sequence.first().copied()
        }
    }

    pub fn trajectory_samples(&self) -> &[TrajectorySample] {
        self.trajectory
            .as_ref()
            .map_or(&[][..], |t| t.samples.as_slice())
    }

    pub fn sequence(&self) -> &[usize] {
        &self.sequence
    }

    /// Per-detection reprojection errors of every camera.
    ///
    /// Empty for unregistered cameras; `None` entries are invalid detections
    /// or capture times outside the trajectory.
    pub fn camera_errors(&self) -> Vec<Vec<Option<Real>>> {
        let Some(traj) = &self.trajectory else {
            return vec![Vec::new(); self.cameras.len()];
        };
        self.cameras
            .iter()
            .map(|c| reprojection_errors(c, &traj.spline))
            .collect()
    }

    /// Mean reprojection error per camera.
    pub fn mean_errors(&self) -> Vec<Option<Real>> {
        let Some(traj) = &self.trajectory else {
            return vec![None; self.cameras.len()];
        };
        self.cameras
            .iter()
            .map(|c| mean_reprojection_error(c, &traj.spline))
            .collect()
    }

    /// Mean over all valid detections of the registered cameras.
    pub fn registered_mean_error(&self) -> Option<Real> {
        let traj = self.trajectory.as_ref()?;
        let (sum, n) = self
            .sequence
            .iter()
            .flat_map(|&c| reprojection_errors(&self.cameras[c], &traj.spline))
            .flatten()
            .fold((0.0, 0usize), |(s, n), e| (s + e, n + 1));
        (n > 0).then(|| sum / n as Real)
    }
}
