//! Problem definition: input, output and export of a trajectory reconstruction.

use anyhow::{Result, ensure};
use mvtraj_core::{
    BSplineTrajectory, Detection, FxFyCxCySkew, Iso3, RawDetection, Real, TimeModel,
    TrajectorySample,
};
use serde::{Deserialize, Deserializer, Serialize};

use super::config::{GroundTruthConfig, ReconstructionConfig};
use super::state::ReconstructionState;
use crate::session::ProblemType;

/// One camera of the rig as delivered by the detection front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraInput {
    #[serde(default)]
    pub name: String,
    pub intrinsics: FxFyCxCySkew<Real>,
    pub fps: Real,
    /// Image size `(width, height)` in pixels.
    pub resolution: (u32, u32),
    /// Accepts either `[frame, u, v]` rows or full detection objects.
    #[serde(deserialize_with = "deserialize_detections")]
    pub detections: Vec<Detection>,
    /// Known time model; skips the offset search for this camera.
    #[serde(default)]
    pub time_prior: Option<TimeModel>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionRecord {
    Raw(RawDetection),
    Full(Detection),
}

fn deserialize_detections<'de, D>(deserializer: D) -> Result<Vec<Detection>, D::Error>
where
    D: Deserializer<'de>,
{
    let records = Vec::<DetectionRecord>::deserialize(deserializer)?;
    Ok(records
        .into_iter()
        .map(|r| match r {
            DetectionRecord::Raw(raw) => Detection::from_raw(raw),
            DetectionRecord::Full(d) => d,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionInput {
    pub cameras: Vec<CameraInput>,
    /// Camera whose frames define the global timeline.
    #[serde(default)]
    pub reference_camera: usize,
}

/// Final values of one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraOutput {
    pub name: String,
    pub intrinsics: FxFyCxCySkew<Real>,
    /// `None` for cameras that were never registered.
    pub camera_se3_world: Option<Iso3>,
    pub time: TimeModel,
    pub rs: Real,
    /// Mean reprojection error of the valid detections inside the trajectory.
    pub mean_error: Option<Real>,
    pub valid_detections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionOutput {
    /// Spline resampled at every global frame.
    pub trajectory: Vec<TrajectorySample>,
    pub spline: BSplineTrajectory,
    /// Registration order.
    pub sequence: Vec<usize>,
    pub cameras: Vec<CameraOutput>,
    pub ground_truth: Option<GroundTruthConfig>,
}

impl ReconstructionOutput {
    pub fn mean_errors(&self) -> Vec<Option<Real>> {
        self.cameras.iter().map(|c| c.mean_error).collect()
    }
}

#[derive(Debug)]
pub struct ReconstructionProblem;

impl ProblemType for ReconstructionProblem {
    type Config = ReconstructionConfig;
    type Input = ReconstructionInput;
    type State = ReconstructionState;
    type Output = ReconstructionOutput;
    type Export = ReconstructionOutput;

    fn name() -> &'static str {
        "trajectory_reconstruction"
    }

    fn validate_input(input: &Self::Input) -> Result<()> {
        ensure!(
            input.cameras.len() >= 2,
            "need at least two cameras, got {}",
            input.cameras.len()
        );
        ensure!(
            input.reference_camera < input.cameras.len(),
            "reference camera {} out of range ({} cameras)",
            input.reference_camera,
            input.cameras.len()
        );
        for (i, cam) in input.cameras.iter().enumerate() {
            ensure!(cam.fps > 0.0, "camera {i}: fps must be positive");
            ensure!(
                cam.intrinsics.fx > 0.0 && cam.intrinsics.fy > 0.0,
                "camera {i}: focal lengths must be positive"
            );
            if let Some(tm) = cam.time_prior {
                ensure!(tm.alpha > 0.0, "camera {i}: time_prior alpha must be positive");
            }
            ensure!(
                cam.detections
                    .iter()
                    .all(|d| d.frame.is_finite() && d.pixel.coords.iter().all(|v| v.is_finite())),
                "camera {i}: detections must be finite"
            );
        }
        Ok(())
    }

    fn validate_config(config: &Self::Config) -> Result<()> {
        config.validate()
    }

    fn validate_input_config(input: &Self::Input, config: &Self::Config) -> Result<()> {
        let n = input.cameras.len();
        if let Some(&bad) = config.camera_sequence.iter().find(|&&c| c >= n) {
            anyhow::bail!("camera_sequence entry {bad} out of range ({n} cameras)");
        }
        Ok(())
    }

    fn export(output: &Self::Output, _config: &Self::Config) -> Result<Self::Export> {
        Ok(output.clone())
    }
}
