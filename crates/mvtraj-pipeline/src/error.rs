use thiserror::Error;

/// Structural failures that abort a reconstruction run.
///
/// Returned wrapped in `anyhow::Error`; use `downcast_ref` to branch on the
/// kind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconstructionError {
    #[error(
        "cameras {first} and {second} share {got} usable correspondences, need at least {needed}"
    )]
    InsufficientCorrespondences {
        first: usize,
        second: usize,
        needed: usize,
        got: usize,
    },
    #[error("degenerate model: {0}")]
    DegenerateModel(String),
    #[error("camera {camera} registration failed: {inliers} inliers, need {required}")]
    RegistrationFailure {
        camera: usize,
        inliers: usize,
        required: usize,
    },
    #[error("no unregistered camera left to register")]
    NoCameraToRegister,
}
