//! Non-linear refinement for multi-view trajectory reconstruction.
//!
//! - [`traits`] / [`backend_lm`]: a small dense non-linear least squares
//!   interface and its Levenberg–Marquardt backend.
//! - [`robust`]: IRLS kernels.
//! - [`spline_fit`]: penalized least-squares smoothing splines through
//!   timestamped 3D samples.
//! - [`time_align`]: robust recovery of per-camera time models.
//! - [`bundle`]: joint refinement of camera poses, time models,
//!   rolling-shutter coefficients and spline control points, solved sparsely
//!   with tiny-solver or densely with the LM backend.

pub mod backend_lm;
pub mod bundle;
pub mod robust;
pub mod spline_fit;
pub mod time_align;
pub mod traits;

pub use backend_lm::LmBackend;
pub use robust::RobustKernel;
pub use traits::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
