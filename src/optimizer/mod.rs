//! Optimizer entry point: validates a run's configuration, wires the problem,
//! solver and callback together, and hands back an [`OptimizationResult`].

use crate::config::{OptimizerConfig, SolverKind};
use crate::core::{ConstraintResolver, OptimizationResult, Parameter, ParameterConstraint, Target, Test};
use crate::error::{ConfigError, Result};
use crate::optimization::{build_solver, CircuitProblem, CostModel, ProgressCallback, SearchController};
use crate::simulation::{CancellationToken, NgSpiceProcess, RunControl, Simulator};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Runs design-space searches against one simulator with one configuration.
///
/// Parameters, tests, targets and constraints are passed per call and never
/// stored, so one optimizer can run several independent searches.
pub struct Optimizer {
    config: OptimizerConfig,
    simulator: Arc<dyn Simulator>,
    cancel: CancellationToken,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig, simulator: Arc<dyn Simulator>) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            simulator,
            cancel: CancellationToken::new(),
        })
    }

    /// Use the batch-mode ngspice adapter on the configured circuit netlist.
    pub fn with_ngspice(config: OptimizerConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let simulator = NgSpiceProcess::from_template(&config.template, &config.circuit)?;
        Self::new(config, Arc::new(simulator))
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Token that aborts running searches; once cancelled it stays cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Search for parameter values meeting `targets`.
    ///
    /// Configuration problems are returned as errors before any simulation
    /// runs. Everything after that ends in a result, successful or not.
    pub fn optimize(
        &self,
        parameters: &[Parameter],
        tests: &[Test],
        targets: &[Target],
        constraints: &[ParameterConstraint],
    ) -> Result<OptimizationResult> {
        let mut controller = SearchController::new(self.config.max_iterations, self.config.precision);

        let control = RunControl {
            cancel: self.cancel.clone(),
            deadline: self.config.run_deadline(),
            call_timeout: self.config.simulation_timeout(),
        };

        let problem = match self.prepare(parameters, tests, targets, constraints, control.clone()) {
            Ok(problem) => problem,
            Err(e) => {
                controller.fail();
                error!(error = %e, "configuration rejected; search not started");
                return Err(e.into());
            }
        };

        let mut callback = ProgressCallback::new(
            self.config.verbose,
            self.config.max_iterations,
            problem.resolver().free_names(),
            control,
        );

        let bounds = problem.resolver().free_bounds();
        let (mut solver, reason) = build_solver(&self.config, &bounds);
        info!(solver = solver.name(), %reason, "solver selected");

        Ok(controller.run(solver.as_mut(), &problem, &mut callback))
    }

    fn prepare(
        &self,
        parameters: &[Parameter],
        tests: &[Test],
        targets: &[Target],
        constraints: &[ParameterConstraint],
        control: RunControl,
    ) -> std::result::Result<CircuitProblem, ConfigError> {
        let mut names = HashSet::with_capacity(tests.len());
        for test in tests {
            if !names.insert(test.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    kind: "test",
                    name: test.name.clone(),
                });
            }
        }
        for target in targets {
            target.validate()?;
        }
        check_metric_coverage(tests, targets)?;

        let resolver = ConstraintResolver::new(parameters, constraints)?.with_grid(self.config.grid);
        let cost_model = CostModel::new(targets.to_vec(), self.config.cost.clone());

        CircuitProblem::new(
            resolver,
            tests.to_vec(),
            cost_model,
            Arc::clone(&self.simulator),
            self.config.circuit.clone(),
            self.config.workers,
            control,
        )
    }
}

/// Reject targets no test can produce.
///
/// Only decidable when every test's metrics are known; otherwise a missing
/// metric is left to the per-candidate penalty.
fn check_metric_coverage(tests: &[Test], targets: &[Target]) -> std::result::Result<(), ConfigError> {
    let declared: Option<Vec<Vec<String>>> = tests.iter().map(Test::declared_metrics).collect();
    let Some(declared) = declared else {
        return Ok(());
    };
    let produced: HashSet<String> = declared.into_iter().flatten().collect();

    match targets.iter().find(|t| !produced.contains(&t.metric_key())) {
        Some(target) => Err(ConfigError::MetricMismatch(target.metric.clone())),
        None => Ok(()),
    }
}

/// One-shot search with an explicit solver choice.
#[allow(clippy::too_many_arguments)]
pub fn optimize(
    simulator: Arc<dyn Simulator>,
    parameters: &[Parameter],
    tests: &[Test],
    targets: &[Target],
    constraints: &[ParameterConstraint],
    solver: SolverKind,
    max_iterations: u32,
    precision: f64,
) -> Result<OptimizationResult> {
    let config = OptimizerConfig {
        solver,
        max_iterations,
        precision,
        ..OptimizerConfig::default()
    };
    Optimizer::new(config, simulator)?.optimize(parameters, tests, targets, constraints)
}
