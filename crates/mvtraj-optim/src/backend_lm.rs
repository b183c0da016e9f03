//! Levenberg–Marquardt backend on top of the `levenberg-marquardt` crate.

use crate::traits::scale_rows;
use crate::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use mvtraj_core::Real;
use nalgebra::{DMatrix, DVector, Dyn, storage::Owned};

/// Adapter holding the current parameters together with the raw residuals
/// and IRLS weights evaluated there, so the Jacobian reuses them.
struct LmAdapter<'a, P: NllsProblem> {
    problem: &'a P,
    x: DVector<Real>,
    raw: DVector<Real>,
    sqrt_w: Option<DVector<Real>>,
}

impl<'a, P: NllsProblem> LmAdapter<'a, P> {
    fn new(problem: &'a P, x: DVector<Real>) -> Self {
        let raw = problem.raw_residuals(&x);
        let sqrt_w = problem.sqrt_weights(&raw);
        Self {
            problem,
            x,
            raw,
            sqrt_w,
        }
    }
}

impl<P: NllsProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmAdapter<'_, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.x.clone_from(x);
        self.raw = self.problem.raw_residuals(x);
        self.sqrt_w = self.problem.sqrt_weights(&self.raw);
    }

    fn params(&self) -> DVector<Real> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let r = match &self.sqrt_w {
            Some(w) => self.raw.component_mul(w),
            None => self.raw.clone(),
        };
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let mut j = self.problem.raw_jacobian(&self.x);
        if let Some(w) = &self.sqrt_w {
            scale_rows(&mut j, w);
        }
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// Dense Levenberg–Marquardt (MINPACK port).
#[derive(Debug, Default, Clone, Copy)]
pub struct LmBackend;

impl NllsSolverBackend for LmBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        let (adapter, report) = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.max_iters.max(1))
            .minimize(LmAdapter::new(problem, x0));

        let solve = SolveReport {
            evaluations: report.number_of_evaluations,
            final_cost: report.objective_function,
            converged: report.termination.was_successful(),
            termination: format!("{:?}", report.termination),
        };
        (adapter.x, solve)
    }
}
