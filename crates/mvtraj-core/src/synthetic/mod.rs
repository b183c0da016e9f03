//! Deterministic synthetic data for tests and benchmarks.
//!
//! - [`noise`]: platform-stable detector jitter, outliers and missed frames.
//! - [`scene`]: multi-camera scenes observing a known 3D curve with known
//!   poses and time models.

pub mod noise;
pub mod scene;

pub use noise::{Corruption, DetectionNoise};
pub use scene::{CameraSpec, SceneOptions, SyntheticCamera, SyntheticScene, curve_point, look_at};
