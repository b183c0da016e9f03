//! Incremental multi-camera trajectory reconstruction.
//!
//! Cameras are registered one at a time. A robust two-view initialization
//! fixes the world frame and the first trajectory; every further camera is
//! located by PnP against the trajectory, contributes newly covered
//! trajectory points, and the whole set is refined by bundle adjustment with
//! residual-based outlier removal in between.
//!
//! ```text
//! Initializing ──init──▶ Registering ──(all cameras in)──▶ Done
//!                          │     ▲
//!                          └─────┘ select, register, triangulate,
//!                                  adjust, remove outliers, adjust
//! ```

mod config;
mod outliers;
mod problem;
mod selection;
mod smoothing;
mod state;
mod steps;

pub use config::{GroundTruthConfig, ReconstructionConfig, SelectionStrategy};
pub use outliers::{flag_outliers, mean_reprojection_error, reprojection_errors};
pub use problem::{
    CameraInput, CameraOutput, ReconstructionInput, ReconstructionOutput, ReconstructionProblem,
};
pub use selection::{candidate_order, overlap};
pub use smoothing::ConstantPositionKalman;
pub use state::{
    CameraState, EventKind, Phase, ReconstructionEvent, ReconstructionState, Trajectory,
};
pub use steps::{
    BundleAdjustOptions, FinalizeOptions, InitOptions, OutlierOptions, PrepareOptions,
    RegisterOptions, SelectOptions, TimeShiftOptions, TriangulateOptions, run_reconstruction,
    step_bundle_adjust, step_finalize, step_init_trajectory, step_prepare, step_register_camera,
    step_remove_outliers, step_select_camera, step_time_shift, step_triangulate,
};
