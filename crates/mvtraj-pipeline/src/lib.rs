//! High-level trajectory reconstruction pipeline.
//!
//! ## Session API
//!
//! A session holds the input, configuration, intermediate state and output
//! of one reconstruction. Step functions advance it; each one can be called
//! on its own for fine-grained control.
//!
//! ```no_run
//! use mvtraj_pipeline::reconstruction::{
//!     ReconstructionProblem, run_reconstruction, step_bundle_adjust, step_init_trajectory,
//!     step_prepare, step_time_shift,
//! };
//! use mvtraj_pipeline::session::ReconstructionSession;
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//!
//! let mut session = ReconstructionSession::<ReconstructionProblem>::new();
//! session.set_input(input)?;
//!
//! // Option 1: step-by-step control
//! step_prepare(&mut session, None)?;
//! step_time_shift(&mut session, None)?;
//! step_init_trajectory(&mut session, None)?;
//! step_bundle_adjust(&mut session, None)?;
//!
//! // Option 2: the whole incremental loop
//! // run_reconstruction(&mut session)?;
//!
//! let export = session.export()?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod reconstruction;
pub mod session;

pub use error::ReconstructionError;

pub use crate::reconstruction::{
    ReconstructionConfig, ReconstructionEvent, ReconstructionInput, ReconstructionOutput,
    ReconstructionProblem, ReconstructionState, run_reconstruction,
};
pub use crate::session::{
    ExportRecord, InvalidationPolicy, LogEntry, ProblemType, ReconstructionSession,
    SessionMetadata, StepOutcome,
};
