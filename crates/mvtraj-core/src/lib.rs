//! Core math and data primitives for `mvtraj`.
//!
//! This crate provides the foundational building blocks used by all other
//! crates in the workspace:
//!
//! - linear algebra type aliases (`Real`, `Pt2`, `Mat34`, and friends),
//! - pinhole intrinsics,
//! - per-camera time models and 2D detections,
//! - a uniform cubic B-spline trajectory representation,
//! - a deterministic, model-agnostic RANSAC engine.
//!
//! Global time is measured in frames of the reference camera. Every other
//! camera maps its local frame index into that timeline through a
//! [`TimeModel`].
//!
//! # Modules
//!
//! - \[`math`\]: basic type aliases and homogeneous helpers.
//! - \[`intrinsics`\]: pinhole intrinsics.
//! - \[`ransac`\]: generic robust estimation helpers.
//! - \[`spline`\]: continuous trajectory representation.
//! - \[`synthetic`\]: deterministic synthetic scenes (tests/benchmarks).
//!
//! # Example
//!
//! ```no_run
//! use mvtraj_core::{BSplineTrajectory, Pt3, SplineSegment};
//!
//! # fn main() -> Result<(), mvtraj_core::SplineError> {
//! let segment = SplineSegment::new(
//!     0.0,
//!     1.0,
//!     vec![Pt3::origin(), Pt3::new(1.0, 0.0, 0.0), Pt3::new(2.0, 0.0, 0.0), Pt3::new(3.0, 0.0, 0.0)],
//! )?;
//! let spline = BSplineTrajectory::new(vec![segment]);
//! assert!(spline.evaluate(0.5).is_some());
//! # Ok(())
//! # }
//! ```

/// Pinhole intrinsics.
mod intrinsics;
/// Linear algebra type aliases and helpers.
mod math;
/// Generic RANSAC engine and traits.
mod ransac;
/// Uniform cubic B-spline trajectories.
mod spline;
/// Deterministic synthetic data generation helpers.
///
/// Used by workspace tests to build multi-camera scenes with known poses,
/// time models and trajectories.
pub mod synthetic;
/// Detections, samples and time models.
mod types;

pub use intrinsics::*;
pub use math::*;
pub use ransac::*;
pub use spline::*;
pub use types::*;
