use crate::optimization::controller::StopReason;

/// How a solver finished: the best candidate it ever observed and why it stopped.
#[derive(Clone, Debug)]
pub struct SolverResult {
    pub stop_reason: StopReason,
    pub cost: f64,
    pub iterations: u32,
    /// Free-parameter values of the best candidate.
    pub params: Vec<f64>,
    pub cost_evals: usize,
}

/// Callback interface for optimization progress
pub trait OptimizationCallback {
    /// Called once per completed iteration with the best candidate so far
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64);

    /// External reason to stop early (cancellation, wall-clock limit)
    fn should_stop(&self) -> Option<StopReason> {
        None
    }
}

/// Core problem definition - just the essentials
///
/// Solvers only see free-parameter vectors; expanding them into a full
/// assignment and simulating is the problem's business.
pub trait Problem: Sync {
    /// Number of parameters
    fn num_params(&self) -> usize;

    /// Initial parameter values
    fn initial_params(&self) -> &[f64];

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];

    /// Evaluate every candidate and return their costs in order.
    ///
    /// Returns only once all evaluations have finished. Never fails: a
    /// candidate that cannot be evaluated gets a large finite penalty.
    fn evaluate_batch(&self, candidates: &[Vec<f64>]) -> Vec<f64>;

    fn cost(&self, params: &[f64]) -> f64 {
        self.evaluate_batch(&[params.to_vec()])
            .pop()
            .unwrap_or(f64::INFINITY)
    }
}

/// Solver interface - takes problem and callback
pub trait Solver {
    fn name(&self) -> &str;

    /// Solve the optimization problem with callback for progress tracking
    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> SolverResult;
}

/// Best candidate seen across every evaluation of a run.
#[derive(Clone, Debug)]
pub(crate) struct Incumbent {
    pub params: Vec<f64>,
    pub cost: f64,
}

impl Incumbent {
    pub fn new(params: &[f64]) -> Self {
        Self {
            params: params.to_vec(),
            cost: f64::INFINITY,
        }
    }

    /// Keep `params` if strictly better; returns whether it was kept.
    pub fn observe(&mut self, params: &[f64], cost: f64) -> bool {
        if cost < self.cost {
            self.cost = cost;
            self.params.clear();
            self.params.extend_from_slice(params);
            true
        } else {
            false
        }
    }

    pub fn into_result(self, stop_reason: StopReason, iterations: u32, cost_evals: usize) -> SolverResult {
        SolverResult {
            stop_reason,
            cost: self.cost,
            iterations,
            params: self.params,
            cost_evals,
        }
    }
}

#[inline]
pub(crate) fn clamp_params(params: &mut [f64], bounds: &[(f64, f64)]) {
    for (value, &(min, max)) in params.iter_mut().zip(bounds) {
        *value = if value.is_nan() { min } else { value.clamp(min, max) };
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Closure-backed problem for solver tests.
    pub struct FnProblem<F> {
        pub f: F,
        pub initial: Vec<f64>,
        pub bounds: Vec<(f64, f64)>,
        pub evals: AtomicUsize,
    }

    impl<F: Fn(&[f64]) -> f64 + Sync> FnProblem<F> {
        pub fn new(f: F, initial: Vec<f64>, bounds: Vec<(f64, f64)>) -> Self {
            Self {
                f,
                initial,
                bounds,
                evals: AtomicUsize::new(0),
            }
        }
    }

    impl<F: Fn(&[f64]) -> f64 + Sync> Problem for FnProblem<F> {
        fn num_params(&self) -> usize {
            self.initial.len()
        }

        fn initial_params(&self) -> &[f64] {
            &self.initial
        }

        fn bounds(&self) -> &[(f64, f64)] {
            &self.bounds
        }

        fn evaluate_batch(&self, candidates: &[Vec<f64>]) -> Vec<f64> {
            self.evals.fetch_add(candidates.len(), Ordering::SeqCst);
            candidates.iter().map(|c| (self.f)(c)).collect()
        }
    }

    /// Records history; optionally requests a stop after `stop_after` iterations.
    #[derive(Default)]
    pub struct Recorder {
        pub costs: Vec<f64>,
        pub iterations: Vec<u32>,
        pub stop_after: Option<u32>,
    }

    impl OptimizationCallback for Recorder {
        fn on_iteration(&mut self, iteration: u32, _params: &[f64], cost: f64) {
            self.iterations.push(iteration);
            self.costs.push(cost);
        }

        fn should_stop(&self) -> Option<StopReason> {
            match self.stop_after {
                Some(n) if self.iterations.len() as u32 >= n => Some(StopReason::Cancelled),
                _ => None,
            }
        }
    }
}
