use thiserror::Error;

/// Errors that can occur during fundamental / essential matrix estimation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EpipolarError {
    /// Not enough point correspondences were provided.
    #[error("need at least {needed} point correspondences, got {got}")]
    InsufficientCorrespondences { needed: usize, got: usize },
    /// The two point sets have different lengths.
    #[error("mismatched correspondence counts: {left} vs {right}")]
    MismatchedCounts { left: usize, right: usize },
    /// Rank-deficient or ill-conditioned configuration.
    #[error("degenerate model: {0}")]
    DegenerateModel(&'static str),
    /// RANSAC failed to find a consensus model.
    #[error("ransac found {inliers} inliers, need at least {required}")]
    NoConsensus { inliers: usize, required: usize },
}
