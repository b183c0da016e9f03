//! Entry crate of `mvtraj`: 3D trajectory reconstruction of a single moving
//! point from unsynchronized, uncalibrated-extrinsics cameras.
//!
//! Each camera contributes 2D detections indexed by its own frame counter.
//! The pipeline recovers, up to a global similarity:
//! - camera poses,
//! - per-camera affine time models (frame-rate ratio and offset),
//! - optional rolling-shutter delays,
//! - a smooth B-spline trajectory sampled on a uniform global time grid.
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//! use mvtraj::prelude::*;
//! use mvtraj::reconstruction::{
//!     step_finalize, step_init_trajectory, step_prepare, step_time_shift,
//! };
//!
//! let mut session = ReconstructionSession::<ReconstructionProblem>::new();
//! session.set_input(input)?;
//!
//! // Option 1: stages one by one; here a two-view reconstruction
//! step_prepare(&mut session, None)?;
//! step_time_shift(&mut session, None)?;
//! step_init_trajectory(&mut session, None)?;
//! step_finalize(&mut session, None)?;
//!
//! // Option 2: the whole incremental loop, finalize included
//! // run_reconstruction(&mut session)?;
//!
//! // Export needs the output published by `step_finalize`.
//! let result = session.export()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`session`] - state container, checkpointing and the [`ProblemType`] trait
//! - [`reconstruction`] - configuration, state and step functions
//! - [`core`] - math types, time models, splines, RANSAC
//! - [`linear`] - epipolar geometry, PnP, triangulation
//! - [`optim`] - spline fitting, time alignment, bundle adjustment
//! - [`synthetic`] - synthetic scenes for tests and demos
//!
//! # Steps
//!
//! | Stage | Step |
//! |-------|------|
//! | Input normalization | `step_prepare` |
//! | Coarse synchronization | `step_time_shift` |
//! | Two-view initialization | `step_init_trajectory` |
//! | Joint refinement | `step_bundle_adjust` |
//! | Outlier rejection | `step_remove_outliers` |
//! | Next camera | `step_select_camera` → `step_register_camera` |
//! | Trajectory growth | `step_triangulate` |
//! | Output | `step_finalize` |

/// Session framework: mutable state containers, step logging and JSON
/// checkpointing.
pub mod session {
    pub use mvtraj_pipeline::session::{
        ExportRecord, InvalidationPolicy, LogEntry, ProblemType, ReconstructionSession,
        SessionMetadata, StepOutcome,
    };
}

/// Incremental reconstruction.
///
/// # Example
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// # let input = unimplemented!();
/// use mvtraj::prelude::*;
///
/// let mut session = ReconstructionSession::<ReconstructionProblem>::with_input(input)?;
/// session.update_config(|c| {
///     c.rolling_shutter = true;
///     c.thres_outlier = 5.0;
/// })?;
/// run_reconstruction(&mut session)?;
/// for cam in &session.require_output()?.cameras {
///     println!("{}: {:?}", cam.name, cam.mean_error);
/// }
/// # Ok(())
/// # }
/// ```
pub mod reconstruction {
    pub use mvtraj_pipeline::reconstruction::{
        // Step options
        BundleAdjustOptions,
        // Problem, data and state
        CameraInput,
        CameraOutput,
        CameraState,
        ConstantPositionKalman,
        EventKind,
        FinalizeOptions,
        GroundTruthConfig,
        InitOptions,
        OutlierOptions,
        Phase,
        PrepareOptions,
        ReconstructionConfig,
        ReconstructionEvent,
        ReconstructionInput,
        ReconstructionOutput,
        ReconstructionProblem,
        ReconstructionState,
        RegisterOptions,
        SelectOptions,
        SelectionStrategy,
        TimeShiftOptions,
        Trajectory,
        TriangulateOptions,
        // Helpers
        candidate_order,
        flag_outliers,
        mean_reprojection_error,
        overlap,
        reprojection_errors,
        // Step functions
        run_reconstruction,
        step_bundle_adjust,
        step_finalize,
        step_init_trajectory,
        step_prepare,
        step_register_camera,
        step_remove_outliers,
        step_select_camera,
        step_time_shift,
        step_triangulate,
    };
    pub use mvtraj_pipeline::ReconstructionError;
}

/// Math types, time models, B-splines and RANSAC primitives.
pub mod core {
    pub use mvtraj_core::*;
}

/// Closed-form estimators.
pub mod linear {
    pub use mvtraj_linear::*;
}

/// Non-linear least squares: spline fitting, time alignment, bundle
/// adjustment.
pub mod optim {
    pub use mvtraj_optim::*;
}

/// Synthetic scenes with known ground truth.
pub mod synthetic {
    pub use mvtraj_core::synthetic::*;
}

pub use mvtraj_pipeline::{
    ReconstructionConfig, ReconstructionError, ReconstructionInput, ReconstructionOutput,
    ReconstructionProblem, run_reconstruction,
};
pub use mvtraj_pipeline::{ProblemType, ReconstructionSession};

pub use mvtraj_core::{
    BSplineTrajectory, Detection, FxFyCxCySkew, Iso3, Pt2, Pt3, RawDetection, Real, TimeModel,
    TrajectorySample, Vec2, Vec3,
};

pub use mvtraj_optim::bundle::BundleBackend;
pub use mvtraj_optim::{RobustKernel, SolveOptions};

/// Convenient re-exports for common use cases.
///
/// ```no_run
/// use mvtraj::prelude::*;
/// ```
pub mod prelude {
    pub use crate::session::{ProblemType, ReconstructionSession};

    pub use crate::reconstruction::{CameraInput, SelectionStrategy};
    pub use crate::{
        ReconstructionConfig, ReconstructionInput, ReconstructionOutput, ReconstructionProblem,
        run_reconstruction,
    };

    pub use crate::{
        BSplineTrajectory, Detection, FxFyCxCySkew, Iso3, Pt2, Pt3, RawDetection, Real, TimeModel,
        TrajectorySample, Vec2, Vec3,
    };

    pub use crate::{BundleBackend, RobustKernel, SolveOptions};
}
