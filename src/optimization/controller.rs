use super::callback::ProgressCallback;
use super::problem::CircuitProblem;
use super::solvers::traits::{Solver, SolverResult};
use crate::core::{OptimizationResult, Parameter};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Lifecycle of one optimisation run.
///
/// `Initialized -> Iterating -> {Converged, Exhausted}`; `Initialized -> Failed`
/// when the configuration is rejected before the first iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Initialized,
    Iterating,
    Converged,
    Exhausted,
    Failed,
}

impl SearchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted | Self::Failed)
    }
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Iterating => "iterating",
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a solver stopped iterating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Best cost reached the precision threshold.
    Converged,
    MaxIterations,
    /// Cost change between accepted steps fell below precision.
    Stalled,
    /// Step size shrank below its minimum while backtracking.
    StepUnderflow,
    /// Global best did not move for the configured number of iterations.
    Stagnated,
    Cancelled,
    TimedOut,
}

impl StopReason {
    fn describe(&self, max_iterations: u32) -> String {
        match self {
            Self::Converged => "precision reached".into(),
            Self::MaxIterations => format!(
                "maximum iterations ({}) reached without meeting precision",
                max_iterations
            ),
            Self::Stalled => "cost change fell below precision".into(),
            Self::StepUnderflow => "step size underflow".into(),
            Self::Stagnated => "swarm stagnated".into(),
            Self::Cancelled => "cancelled".into(),
            Self::TimedOut => "run timeout reached".into(),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxIterations => f.write_str("maximum iterations reached"),
            other => f.write_str(&other.describe(0)),
        }
    }
}

/// Drives a solver over a problem and packages the outcome.
///
/// The controller owns the run state; solvers only report how they stopped.
pub struct SearchController {
    state: SearchState,
    max_iterations: u32,
    precision: f64,
}

impl SearchController {
    pub fn new(max_iterations: u32, precision: f64) -> Self {
        Self {
            state: SearchState::Initialized,
            max_iterations,
            precision,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Configuration was rejected; the run never starts.
    pub fn fail(&mut self) {
        if self.state == SearchState::Initialized {
            self.state = SearchState::Failed;
        }
    }

    pub fn run(
        &mut self,
        solver: &mut dyn Solver,
        problem: &CircuitProblem,
        callback: &mut ProgressCallback,
    ) -> OptimizationResult {
        self.state = SearchState::Iterating;
        info!(
            solver = solver.name(),
            free_params = problem.resolver().num_free(),
            max_iterations = self.max_iterations,
            precision = self.precision,
            "search started"
        );

        let outcome = solver.solve(problem, callback);

        let resolved = match problem.resolver().resolve(&outcome.params) {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "best candidate no longer resolves; reporting initial values");
                problem.initial_assignment().to_vec()
            }
        };
        let parameters = problem.resolver().snapshot(&resolved);
        let history = callback.history().iter().map(|r| r.cost).collect();

        let result = self.finish(
            outcome,
            parameters,
            history,
            problem.cost_evals(),
            problem.failed_evals(),
        );
        callback.log_summary(&result);
        result
    }

    /// Move to a terminal state and build the result.
    pub fn finish(
        &mut self,
        outcome: SolverResult,
        parameters: Vec<Parameter>,
        history: Vec<f64>,
        cost_evals: usize,
        failed_evals: usize,
    ) -> OptimizationResult {
        let converged =
            outcome.stop_reason == StopReason::Converged && outcome.cost <= self.precision;
        self.state = if converged {
            SearchState::Converged
        } else {
            SearchState::Exhausted
        };

        let message = if converged {
            format!(
                "Converged: cost {:.6e} <= precision {:.6e} after {} iterations",
                outcome.cost, self.precision, outcome.iterations
            )
        } else {
            format!(
                "Exhausted: {} (best cost {:.6e})",
                outcome.stop_reason.describe(self.max_iterations),
                outcome.cost
            )
        };

        OptimizationResult {
            success: converged,
            cost: outcome.cost,
            iterations: outcome.iterations,
            message,
            parameters,
            state: self.state,
            stop_reason: outcome.stop_reason,
            cost_evals,
            failed_evals,
            history,
        }
    }
}
