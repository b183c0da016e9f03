//! Sparse bundle adjustment through tiny-solver.
//!
//! Every camera contributes three variables (`cam{i}.pose`, `cam{i}.time`,
//! `cam{i}.rs`) and every control point one (`seg{s}.c{k}`). A detection is
//! a residual block over its camera's variables and the four control points
//! of its span, so the normal equations stay sparse and long trajectories
//! fit in memory.
//!
//! Spans are bound when the problem is compiled. Capture times move during
//! the solve, so the problem is recompiled until no detection changes span.

use super::problem::BundleProblem;
use super::residual::{
    CAMERA_DIM, LOCAL_DIM, ObservationContext, POSE_DIM, TIME_DIM, reprojection_residual_generic,
};
use crate::{RobustKernel, SolveOptions, SolveReport};
use anyhow::{Result, ensure};
use log::debug;
use mvtraj_core::Real;
use nalgebra::{DVector, RealField};
use std::collections::{HashMap, HashSet};
use tiny_solver::factors::{Factor, FactorImpl};
use tiny_solver::loss_functions::{CauchyLoss, HuberLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{LevenbergMarquardtOptimizer, linear::sparse::LinearSolverType};

/// Recompilations allowed when detections cross span boundaries.
const MAX_REBIND_ROUNDS: usize = 4;

/// Detection against the spline, over
/// `[pose, time, rs, c(span), c(span+1), c(span+2), c(span+3)]`.
#[derive(Debug, Clone)]
struct ReprojectionFactor {
    ctx: ObservationContext,
}

impl<T: RealField> Factor<T> for ReprojectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 7, "expected camera and span parameter blocks");
        let p: Vec<T> = params.iter().flat_map(|b| b.iter().cloned()).collect();
        debug_assert_eq!(p.len(), LOCAL_DIM);
        let r = reprojection_residual_generic(&p, &self.ctx);
        DVector::from_row_slice(r.as_slice())
    }
}

/// Weighted second difference over three consecutive control points.
#[derive(Debug, Clone)]
struct SecondDifferenceFactor {
    sqrt_weights: [Real; 3],
    inv_h2: Real,
}

impl<T: RealField> Factor<T> for SecondDifferenceFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 3, "expected three control points");
        let scale = T::from_f64(self.inv_h2).unwrap();
        DVector::from_fn(3, |a, _| {
            let w = T::from_f64(self.sqrt_weights[a]).unwrap();
            let d = params[0][a].clone() - params[1][a].clone() * T::from_f64(2.0).unwrap()
                + params[2][a].clone();
            w * d * scale.clone()
        })
    }
}

fn camera_var(ci: usize, block: &str) -> String {
    format!("cam{ci}.{block}")
}

fn ctrl_var(segment: usize, k: usize) -> String {
    format!("seg{segment}.c{k}")
}

fn compile_loss(robust: RobustKernel) -> Result<Option<Box<dyn Loss + Send>>> {
    match robust {
        RobustKernel::None => Ok(None),
        RobustKernel::Huber { delta } => {
            ensure!(delta > 0.0, "Huber delta must be positive");
            Ok(Some(Box::new(HuberLoss::new(delta))))
        }
        RobustKernel::Cauchy { c } => {
            ensure!(c > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(c))))
        }
    }
}

fn to_optimizer_options(opts: &SolveOptions) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: 0,
        linear_solver_type: LinearSolverType::SparseCholesky,
        min_rel_error_decrease_threshold: opts.ftol,
        ..OptimizerOptions::default()
    }
}

/// Compile `problem` at `x` with the given span bindings.
///
/// Only variables referenced by some residual block are returned as initial
/// values; the rest keep their value in `x`.
fn compile(
    problem: &BundleProblem,
    x: &DVector<Real>,
    spans: &[usize],
    robust: RobustKernel,
) -> Result<(Problem, HashMap<String, DVector<Real>>)> {
    let mut tiny = Problem::new();
    let mut used = HashSet::new();

    for (obs, &span) in problem.observations.iter().zip(spans) {
        let (_, mut ctx, _) = problem.local(x, obs);
        ctx.span = span;
        let ci = obs.camera;
        let names = [
            camera_var(ci, "pose"),
            camera_var(ci, "time"),
            camera_var(ci, "rs"),
            ctrl_var(obs.segment, span),
            ctrl_var(obs.segment, span + 1),
            ctrl_var(obs.segment, span + 2),
            ctrl_var(obs.segment, span + 3),
        ];
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let factor: Box<dyn FactorImpl + Send> = Box::new(ReprojectionFactor { ctx });
        tiny.add_residual_block(2, &refs, factor, compile_loss(robust)?);
        used.extend(names);
    }

    if let Some(sqrt_weights) = problem.motion_sqrt_weights {
        for (si, seg) in problem.segments.iter().enumerate() {
            let inv_h2 = 1.0 / (seg.knot_spacing * seg.knot_spacing);
            for k in 1..seg.num_ctrl.saturating_sub(1) {
                let names = [ctrl_var(si, k - 1), ctrl_var(si, k), ctrl_var(si, k + 1)];
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                let factor: Box<dyn FactorImpl + Send> = Box::new(SecondDifferenceFactor {
                    sqrt_weights,
                    inv_h2,
                });
                tiny.add_residual_block(3, &refs, factor, None);
                used.extend(names);
            }
        }
    }

    let mut initial = HashMap::new();
    for (ci, block) in problem.cameras.iter().enumerate() {
        let v = problem.camera_values(x, ci);
        let parts = [
            ("pose", 0..POSE_DIM, block.pose.is_some()),
            ("time", POSE_DIM..POSE_DIM + TIME_DIM, block.time.is_some()),
            ("rs", CAMERA_DIM - 1..CAMERA_DIM, block.rs.is_some()),
        ];
        for (part, range, free) in parts {
            let name = camera_var(ci, part);
            if !used.contains(&name) {
                continue;
            }
            if !free {
                for idx in 0..range.len() {
                    tiny.fix_variable(&name, idx);
                }
            }
            initial.insert(name, DVector::from_row_slice(&v[range]));
        }
    }
    for (si, seg) in problem.segments.iter().enumerate() {
        for k in 0..seg.num_ctrl {
            let name = ctrl_var(si, k);
            if used.contains(&name) {
                let o = seg.offset + 3 * k;
                initial.insert(name, DVector::from_row_slice(&x.as_slice()[o..o + 3]));
            }
        }
    }
    Ok((tiny, initial))
}

/// Copy the free variables of `solution` into the global vector.
fn write_back(
    problem: &BundleProblem,
    solution: &HashMap<String, DVector<Real>>,
    x: &mut DVector<Real>,
) {
    let mut copy = |name: String, offset: usize| {
        if let Some(v) = solution.get(&name) {
            x.as_mut_slice()[offset..offset + v.len()].copy_from_slice(v.as_slice());
        }
    };
    for (ci, block) in problem.cameras.iter().enumerate() {
        if let Some(o) = block.pose {
            copy(camera_var(ci, "pose"), o);
        }
        if let Some(o) = block.time {
            copy(camera_var(ci, "time"), o);
        }
        if let Some(o) = block.rs {
            copy(camera_var(ci, "rs"), o);
        }
    }
    for (si, seg) in problem.segments.iter().enumerate() {
        for k in 0..seg.num_ctrl {
            copy(ctrl_var(si, k), seg.offset + 3 * k);
        }
    }
}

/// Minimize the bundle cost with sparse Levenberg–Marquardt.
///
/// A failed linear solve keeps the last accepted parameters and reports
/// non-convergence.
pub(super) fn solve_sparse(
    problem: &BundleProblem,
    x0: DVector<Real>,
    robust: RobustKernel,
    opts: &SolveOptions,
) -> Result<(DVector<Real>, SolveReport)> {
    let optimizer = LevenbergMarquardtOptimizer::default();
    let mut x = x0;
    let mut spans = problem.spans(&x);

    for round in 0..MAX_REBIND_ROUNDS {
        let (tiny, initial) = compile(problem, &x, &spans, robust)?;
        let Some(solution) =
            optimizer.optimize(&tiny, &initial, Some(to_optimizer_options(opts)))
        else {
            let report = SolveReport {
                evaluations: 0,
                final_cost: tiny_cost(&tiny, &initial),
                converged: false,
                termination: "tiny-solver linear solve failed".to_string(),
            };
            return Ok((x, report));
        };
        write_back(problem, &solution, &mut x);

        let rebound = problem.spans(&x);
        let moved = rebound.iter().zip(&spans).filter(|(a, b)| a != b).count();
        if moved == 0 {
            let cost = tiny_cost(&tiny, &solution);
            return Ok((x, finished(cost, round + 1, true)));
        }
        debug!("sparse bundle: {moved} detections changed span after round {round}");
        spans = rebound;
    }

    let (tiny, initial) = compile(problem, &x, &spans, robust)?;
    let cost = tiny_cost(&tiny, &initial);
    Ok((x, finished(cost, MAX_REBIND_ROUNDS, false)))
}

fn tiny_cost(tiny: &Problem, values: &HashMap<String, DVector<Real>>) -> Real {
    let blocks = tiny.initialize_parameter_blocks(values);
    0.5 * tiny.compute_residuals(&blocks, true).as_ref().squared_norm_l2()
}

fn finished(final_cost: Real, rounds: usize, converged: bool) -> SolveReport {
    let termination = if converged {
        format!("tiny-solver finished after {rounds} span binding round(s)")
    } else {
        format!("spans still moving after {rounds} rounds")
    };
    SolveReport {
        evaluations: 0,
        final_cost,
        converged,
        termination,
    }
}
