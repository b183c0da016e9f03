//! Linear initialization algorithms for multi-view trajectory reconstruction.
//!
//! These solvers provide the closed-form starting points that the non-linear
//! refinement in `mvtraj-optim` builds on:
//!
//! - [`normalization`]: Hartley similarity normalization of 2D points.
//! - [`epipolar`]: fundamental / essential matrices (linear and RANSAC),
//!   Sampson error, epipoles, projection matrices from `F`, and relative pose
//!   recovery with cheirality.
//! - [`triangulation`]: multi-view linear (DLT) triangulation.
//! - [`pnp`]: camera registration from 2D-3D correspondences.
//!
//! Fundamental matrices follow the `x2^T F x1 = 0` convention with pixel
//! coordinates; essential matrices use normalized coordinates `K^{-1} x`.

pub mod epipolar;
mod error;
pub mod normalization;
pub mod pnp;
pub mod triangulation;

pub use error::EpipolarError;

pub mod prelude {
    pub use crate::epipolar::{
        FundamentalEstimator, decompose_essential, essential_8point, essential_from_fundamental,
        fundamental_8point, fundamental_8point_ransac, projection_from_fundamental,
        recover_relative_pose, sampson_error,
    };
    pub use crate::normalization::normalize_points_2d;
    pub use crate::pnp::{dlt, dlt_ransac};
    pub use crate::triangulation::triangulate_point_linear;
}
