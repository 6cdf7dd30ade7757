use super::cost::{CostBreakdown, CostModel};
use super::solvers::traits::Problem;
use crate::core::{ConstraintResolver, Test};
use crate::error::{ConfigError, SimError};
use crate::simulation::{
    normalize_metric_name, Assignment, MetricMap, RunControl, SimulationRequest, Simulator,
};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Circuit problem encapsulating simulation, parameters, and constraints
///
/// Solvers hand it free-parameter vectors. Each candidate is resolved into a
/// full assignment, every test is simulated on the worker pool, and the
/// resulting metrics are scored by the cost model.
pub struct CircuitProblem {
    resolver: ConstraintResolver,
    tests: Vec<Test>,
    cost_model: CostModel,
    simulator: Arc<dyn Simulator>,
    template: String,
    pool: ThreadPool,
    control: RunControl,

    initial: Vec<f64>,
    initial_assignment: Vec<f64>,
    bounds: Vec<(f64, f64)>,

    cost_evals: AtomicUsize,
    failed_evals: AtomicUsize,
}

impl CircuitProblem {
    pub fn new(
        resolver: ConstraintResolver,
        tests: Vec<Test>,
        cost_model: CostModel,
        simulator: Arc<dyn Simulator>,
        template: impl Into<String>,
        workers: usize,
        control: RunControl,
    ) -> Result<Self, ConfigError> {
        // The starting point must resolve; later candidates may fail and get penalised
        let initial_assignment = resolver.resolve_initial()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("circuitopt-sim-{}", i))
            .build()
            .map_err(|e| ConfigError::InvalidOption(format!("cannot start worker pool: {}", e)))?;

        let template = template.into();
        info!(
            template = %template,
            simulator = simulator.name(),
            parameters = resolver.parameters().len(),
            free = resolver.num_free(),
            tests = tests.len(),
            targets = cost_model.targets().len(),
            workers = workers.max(1),
            "circuit loaded"
        );

        Ok(Self {
            initial: resolver.initial_free_values(),
            bounds: resolver.free_bounds(),
            initial_assignment,
            resolver,
            tests,
            cost_model,
            simulator,
            template,
            pool,
            control,
            cost_evals: AtomicUsize::new(0),
            failed_evals: AtomicUsize::new(0),
        })
    }

    pub fn resolver(&self) -> &ConstraintResolver {
        &self.resolver
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Resolved values of the configured starting point.
    pub fn initial_assignment(&self) -> &[f64] {
        &self.initial_assignment
    }

    /// Candidates scored so far.
    pub fn cost_evals(&self) -> usize {
        self.cost_evals.load(Ordering::Relaxed)
    }

    /// Simulation calls that failed and were penalised.
    pub fn failed_evals(&self) -> usize {
        self.failed_evals.load(Ordering::Relaxed)
    }

    /// Score every candidate, returning once all candidate/test jobs are done.
    pub fn evaluate_candidates(&self, candidates: &[Vec<f64>]) -> Vec<CostBreakdown> {
        let assignments: Vec<Option<Assignment>> = candidates
            .iter()
            .map(|free| match self.resolver.resolve(free) {
                Ok(values) => Some(self.resolver.assignment(&values)),
                Err(e) => {
                    warn!(error = %e, candidate = ?free, "constraint evaluation failed; candidate penalised");
                    None
                }
            })
            .collect();

        let jobs: Vec<(usize, usize)> = assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_some())
            .flat_map(|(ci, _)| (0..self.tests.len()).map(move |ti| (ci, ti)))
            .collect();

        // Barrier: collect() returns only when every job has finished
        let outcomes: Vec<Option<MetricMap>> = self.pool.install(|| {
            jobs.par_iter()
                .map(|&(ci, ti)| {
                    assignments[ci]
                        .as_ref()
                        .and_then(|assignment| self.simulate(assignment, &self.tests[ti]))
                })
                .collect()
        });

        let mut gathered: Vec<(Vec<MetricMap>, usize)> = vec![(Vec::new(), 0); candidates.len()];
        for (&(ci, _), outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Some(metrics) => gathered[ci].0.push(metrics),
                None => gathered[ci].1 += 1,
            }
        }

        self.cost_evals.fetch_add(candidates.len(), Ordering::Relaxed);

        assignments
            .iter()
            .zip(gathered)
            .map(|(assignment, (measurements, failed))| match assignment {
                Some(_) => self.cost_model.evaluate(&measurements, failed),
                None => self.cost_model.evaluate(&[], self.tests.len()),
            })
            .collect()
    }

    fn simulate(&self, assignment: &Assignment, test: &Test) -> Option<MetricMap> {
        if let Some(reason) = self.control.should_abort() {
            debug!(test = %test.name, ?reason, "simulation skipped");
            return None;
        }

        let request = SimulationRequest {
            template: &self.template,
            assignment,
            test,
            control: &self.control,
        };

        match self.simulator.submit(&request) {
            Ok(metrics) => Some(
                metrics
                    .into_iter()
                    .map(|(name, value)| (normalize_metric_name(&name), value))
                    .collect(),
            ),
            Err(e @ (SimError::Cancelled | SimError::DeadlineReached)) => {
                debug!(test = %test.name, reason = %e, "simulation aborted");
                None
            }
            Err(e) => {
                self.failed_evals.fetch_add(1, Ordering::Relaxed);
                warn!(test = %test.name, error = %e, "simulation failed; candidate penalised");
                None
            }
        }
    }
}

impl Problem for CircuitProblem {
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
        self.evaluate_candidates(candidates)
            .into_iter()
            .map(|breakdown| breakdown.total)
            .collect()
    }
}
