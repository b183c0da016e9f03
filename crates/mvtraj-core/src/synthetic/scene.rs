//! Synthetic multi-camera scenes observing a known 3D curve.

use super::noise::{Corruption, DetectionNoise};
use crate::{Detection, FxFyCxCySkew, Iso3, Mat3, Pt3, Real, TimeModel, TrajectorySample, Vec3};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};

/// Ground-truth curve in global time (reference-camera frames).
///
/// A non-planar Lissajous-like loop of a few meters around `(0, 0, 1)`.
pub fn curve_point(t: Real) -> Pt3 {
    Pt3::new(
        3.0 * (0.05 * t).cos(),
        2.0 * (0.07 * t).sin(),
        1.0 + 1.5 * (0.031 * t).sin(),
    )
}

/// World-to-camera pose of a camera at `eye` looking at `target`, world `+z` up.
pub fn look_at(eye: &Pt3, target: &Pt3) -> Iso3 {
    let forward = (target - eye).normalize();
    let right = forward.cross(&Vec3::z()).normalize();
    let down = forward.cross(&right);
    let r = Mat3::from_rows(&[right.transpose(), down.transpose(), forward.transpose()]);
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let t = -(rot * eye.coords);
    Iso3::from_parts(Translation3::from(t), rot)
}

/// Placement and clock of one synthetic camera.
#[derive(Debug, Clone)]
pub struct CameraSpec {
    /// Position on the camera ring, degrees.
    pub azimuth_deg: Real,
    pub height: Real,
    pub fps: Real,
    /// True local-to-global time mapping.
    pub time: TimeModel,
    pub num_frames: usize,
}

#[derive(Debug, Clone)]
pub struct SceneOptions {
    pub intrinsics: FxFyCxCySkew<Real>,
    pub resolution: (u32, u32),
    /// Camera ring radius around the curve center (meters).
    pub radius: Real,
    /// The curve exists on `[0, duration]` global frames.
    pub duration: Real,
    pub cameras: Vec<CameraSpec>,
    /// Jitter, outliers and missed frames applied to every projection.
    pub noise: DetectionNoise,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            intrinsics: FxFyCxCySkew {
                fx: 800.0,
                fy: 780.0,
                cx: 640.0,
                cy: 360.0,
                skew: 0.0,
            },
            resolution: (1280, 720),
            radius: 14.0,
            duration: 240.0,
            cameras: vec![
                CameraSpec {
                    azimuth_deg: 0.0,
                    height: 2.0,
                    fps: 30.0,
                    time: TimeModel::identity(),
                    num_frames: 240,
                },
                CameraSpec {
                    azimuth_deg: 65.0,
                    height: 3.5,
                    fps: 30.0,
                    time: TimeModel::new(1.0, 7.0),
                    num_frames: 240,
                },
                CameraSpec {
                    azimuth_deg: 150.0,
                    height: 1.0,
                    fps: 60.0,
                    time: TimeModel::new(0.5, -4.0),
                    num_frames: 480,
                },
                CameraSpec {
                    azimuth_deg: 250.0,
                    height: 4.0,
                    fps: 25.0,
                    time: TimeModel::new(1.2, 10.0),
                    num_frames: 200,
                },
            ],
            noise: DetectionNoise::default(),
        }
    }
}

/// One camera of a synthetic scene with its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    pub intrinsics: FxFyCxCySkew<Real>,
    pub resolution: (u32, u32),
    pub camera_se3_world: Iso3,
    pub fps: Real,
    pub time: TimeModel,
    pub detections: Vec<Detection>,
    /// Indices into `detections` that were displaced on purpose.
    pub outliers: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub duration: Real,
    pub cameras: Vec<SyntheticCamera>,
}

impl SyntheticScene {
    pub fn generate(opts: &SceneOptions) -> Self {
        let target = Pt3::new(0.0, 0.0, 1.0);
        let (w, h) = (opts.resolution.0 as Real, opts.resolution.1 as Real);

        let cameras = opts
            .cameras
            .iter()
            .enumerate()
            .map(|(cam_idx, spec)| {
                let az = spec.azimuth_deg.to_radians();
                let eye = Pt3::new(opts.radius * az.cos(), opts.radius * az.sin(), spec.height);
                let pose = look_at(&eye, &target);

                let mut detections = Vec::new();
                let mut outliers = Vec::new();
                for frame in 0..spec.num_frames {
                    let t = spec.time.to_global(frame as Real);
                    if t < 0.0 || t > opts.duration {
                        continue;
                    }
                    let pc = pose.transform_point(&curve_point(t));
                    let Some(uv) = opts.intrinsics.project(&pc.coords) else {
                        continue;
                    };
                    if uv.x < 0.0 || uv.y < 0.0 || uv.x >= w || uv.y >= h {
                        continue;
                    }
                    let px = match opts.noise.corrupt(cam_idx, frame, uv) {
                        Corruption::Missed => continue,
                        Corruption::Inlier(px) => px,
                        Corruption::Outlier(px) => {
                            outliers.push(detections.len());
                            px
                        }
                    };
                    detections.push(Detection::new(frame as Real, px));
                }

                SyntheticCamera {
                    intrinsics: opts.intrinsics,
                    resolution: opts.resolution,
                    camera_se3_world: pose,
                    fps: spec.fps,
                    time: spec.time,
                    detections,
                    outliers,
                }
            })
            .collect();

        Self {
            duration: opts.duration,
            cameras,
        }
    }

    /// Ground-truth samples at the given global times.
    pub fn ground_truth(&self, times: &[Real]) -> Vec<TrajectorySample> {
        times
            .iter()
            .map(|&t| TrajectorySample::new(t, curve_point(t)))
            .collect()
    }
}
