//! Perspective-n-Point: pose of a new camera from 2D detections of known 3D points.

mod dlt;
mod ransac;

pub use dlt::dlt;
pub use ransac::{PnpDatum, PnpEstimator, dlt_ransac};
