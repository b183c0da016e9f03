//! Dense least-squares interface shared by the refinement problems.
//!
//! A problem exposes its raw residual vector and Jacobian. Robust kernels
//! enter through optional per-row square-root weights computed from the raw
//! residuals (IRLS); backends treat the weights as constants when forming
//! the weighted Jacobian.

use mvtraj_core::Real;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub trait NllsProblem {
    fn num_params(&self) -> usize;
    fn num_residuals(&self) -> usize;

    fn raw_residuals(&self, x: &DVector<Real>) -> DVector<Real>;
    fn raw_jacobian(&self, x: &DVector<Real>) -> DMatrix<Real>;

    /// `sqrt(w_i)` for every residual row, or `None` for unit weights.
    fn sqrt_weights(&self, _raw: &DVector<Real>) -> Option<DVector<Real>> {
        None
    }
}

/// Scale the rows of `j` by `sqrt_w`, skipping unit rows.
pub fn scale_rows(j: &mut DMatrix<Real>, sqrt_w: &DVector<Real>) {
    debug_assert_eq!(j.nrows(), sqrt_w.len());
    for (i, &s) in sqrt_w.iter().enumerate().filter(|(_, s)| **s != 1.0) {
        j.row_mut(i).scale_mut(s);
    }
}

/// Stopping rules of a solve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Outer iteration cap. The LM backend allows `max_iters * (n + 1)`
    /// residual evaluations, following MINPACK.
    pub max_iters: usize,
    pub ftol: Real,
    pub gtol: Real,
    pub xtol: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Residual evaluations spent.
    pub evaluations: usize,
    /// Half the weighted sum of squares at the returned parameters.
    pub final_cost: Real,
    /// A tolerance was met before the evaluation cap.
    pub converged: bool,
    pub termination: String,
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
