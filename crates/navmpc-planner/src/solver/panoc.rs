//! PANOC backend (`optimization_engine`)

use std::time::{Duration, Instant};

use optimization_engine::constraints::Rectangle;
use optimization_engine::core::ExitStatus as PanocExit;
use optimization_engine::panoc::{PANOCCache, PANOCOptimizer};
use optimization_engine::{Optimizer, Problem, SolverError};
use tracing::trace;

use super::{BackendError, ExitStatus, NmpcSolver, Solution};
use crate::config::MpcConfig;
use crate::cost::CostModel;

/// Box-constrained PANOC over the penalized cost
pub struct PanocSolver {
    cost: CostModel,
    cache: PANOCCache,
    max_iterations: usize,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl PanocSolver {
    pub const NAME: &'static str = "panoc";

    pub fn new(config: &MpcConfig) -> Self {
        let cost = CostModel::new(config);
        let n = cost.layout().n_decision();
        let r = &config.robot;
        let lower = (0..n)
            .map(|i| if i % 2 == 0 { r.lin_vel_min } else { -r.ang_vel_max })
            .collect();
        let upper = (0..n)
            .map(|i| if i % 2 == 0 { r.lin_vel_max } else { r.ang_vel_max })
            .collect();

        Self {
            cache: PANOCCache::new(n, config.solver.tolerance, config.solver.lbfgs_memory),
            cost,
            max_iterations: config.solver.max_iterations,
            lower,
            upper,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost
    }
}

impl NmpcSolver for PanocSolver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn solve(
        &mut self,
        parameters: &[f64],
        initial_guess: &[f64],
        deadline: Duration,
    ) -> Result<Solution, BackendError> {
        let n_params = self.cost.layout().len();
        if parameters.len() != n_params {
            return Err(BackendError::DimensionMismatch {
                what: "parameter vector",
                expected: n_params,
                got: parameters.len(),
            });
        }
        if initial_guess.len() != self.lower.len() {
            return Err(BackendError::DimensionMismatch {
                what: "initial guess",
                expected: self.lower.len(),
                got: initial_guess.len(),
            });
        }

        let mut u: Vec<f64> = initial_guess
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(x, (lo, hi))| x.clamp(*lo, *hi))
            .collect();

        let model = &self.cost;
        let f = |u: &[f64], c: &mut f64| -> Result<(), SolverError> {
            *c = model.cost(parameters, u);
            Ok(())
        };
        let df = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            model.gradient(parameters, u, grad);
            Ok(())
        };

        let bounds = Rectangle::new(Some(&self.lower), Some(&self.upper));
        let problem = Problem::new(&bounds, df, f);
        let mut panoc = PANOCOptimizer::new(problem, &mut self.cache)
            .with_max_iter(self.max_iterations)
            .with_max_duration(deadline);

        let started = Instant::now();
        let solution = match panoc.solve(&mut u) {
            Ok(status) => {
                let exit_status = match status.exit_status() {
                    PanocExit::Converged => ExitStatus::Converged,
                    PanocExit::NotConvergedIterations => ExitStatus::NotConvergedIterations,
                    PanocExit::NotConvergedOutOfTime => ExitStatus::NotConvergedOutOfTime,
                };
                Solution {
                    exit_status,
                    iterations: status.iterations(),
                    solve_time: status.solve_time(),
                    cost: status.cost_value(),
                    u,
                }
            }
            Err(err) => {
                let exit_status = match err {
                    SolverError::Cost => ExitStatus::NotConvergedCost,
                    _ => ExitStatus::NotConvergedNotFiniteComputation,
                };
                Solution {
                    exit_status,
                    iterations: 0,
                    solve_time: started.elapsed(),
                    cost: f64::NAN,
                    u,
                }
            }
        };

        trace!(
            status = %solution.exit_status,
            iterations = solution.iterations,
            solve_time_us = solution.solve_time.as_micros() as u64,
            "panoc solve finished"
        );
        Ok(solution)
    }
}
