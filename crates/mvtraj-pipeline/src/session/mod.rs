//! Session framework.
//!
//! A session is a mutable container holding configuration, input, the
//! intermediate state of a problem and its final output. Step functions
//! take the session by mutable reference and advance it in place, so a run
//! can be inspected, serialized and resumed between any two steps.
//!
//! ```no_run
//! use mvtraj_pipeline::session::ReconstructionSession;
//! use mvtraj_pipeline::reconstruction::{ReconstructionProblem, run_reconstruction};
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//! let mut session = ReconstructionSession::<ReconstructionProblem>::new();
//! session.set_input(input)?;
//! run_reconstruction(&mut session)?;
//! let snapshot = session.to_json()?;
//! # Ok(())
//! # }
//! ```

mod container;
mod problem_type;
mod types;

pub use container::ReconstructionSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{ExportRecord, LogEntry, SessionMetadata, StepOutcome, unix_seconds};
