//! Python bindings (`python` feature).
//!
//! Thin wrappers over the native types; the search itself runs with the GIL
//! released.

use crate::config::{OptimizerConfig, SolverKind};
use crate::core::{
    Environment, OptimizationResult, Parameter, ParameterConstraint, RelationshipType, Target,
    TargetMode, Test,
};
use crate::error::Error;
use crate::optimizer::Optimizer;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

fn to_py_err(err: impl Into<Error>) -> PyErr {
    match err.into() {
        Error::Config(e) => PyValueError::new_err(e.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

// ===== ENUMS =====

#[pyclass(name = "TargetMode", eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyTargetMode {
    Min,
    Max,
    Target,
}

#[pymethods]
impl PyTargetMode {
    fn __repr__(&self) -> &str {
        match self {
            Self::Min => "TargetMode.Min",
            Self::Max => "TargetMode.Max",
            Self::Target => "TargetMode.Target",
        }
    }
}

impl From<PyTargetMode> for TargetMode {
    fn from(mode: PyTargetMode) -> Self {
        match mode {
            PyTargetMode::Min => TargetMode::Min,
            PyTargetMode::Max => TargetMode::Max,
            PyTargetMode::Target => TargetMode::Target,
        }
    }
}

impl From<TargetMode> for PyTargetMode {
    fn from(mode: TargetMode) -> Self {
        match mode {
            TargetMode::Min => PyTargetMode::Min,
            TargetMode::Max => PyTargetMode::Max,
            TargetMode::Target => PyTargetMode::Target,
        }
    }
}

#[pyclass(name = "RelationshipType", eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyRelationshipType {
    Equals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl From<PyRelationshipType> for RelationshipType {
    fn from(rel: PyRelationshipType) -> Self {
        match rel {
            PyRelationshipType::Equals => RelationshipType::Equals,
            PyRelationshipType::GreaterThan => RelationshipType::GreaterThan,
            PyRelationshipType::LessThan => RelationshipType::LessThan,
            PyRelationshipType::GreaterThanOrEqual => RelationshipType::GreaterThanOrEqual,
            PyRelationshipType::LessThanOrEqual => RelationshipType::LessThanOrEqual,
        }
    }
}

// ===== CORE DATA TYPES =====

#[pyclass(name = "Environment")]
#[derive(Clone, Debug)]
pub struct PyEnvironment {
    #[pyo3(get, set)]
    pub name: String,
    #[pyo3(get, set)]
    pub value: String,
}

#[pymethods]
impl PyEnvironment {
    #[new]
    fn new(name: String, value: String) -> Self {
        Self { name, value }
    }
}

#[pyclass(name = "Parameter")]
#[derive(Clone, Debug)]
pub struct PyParameter {
    inner: Parameter,
}

#[pymethods]
impl PyParameter {
    #[new]
    fn new(name: String, value: f64, min_val: f64, max_val: f64) -> PyResult<Self> {
        let inner = Parameter::new(name, value, min_val, max_val).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    #[getter]
    fn value(&self) -> f64 {
        self.inner.value()
    }

    /// Assigning out of range clamps.
    #[setter]
    fn set_value(&mut self, value: f64) {
        self.inner.set_value(value);
    }

    #[getter]
    fn min_val(&self) -> f64 {
        self.inner.min_val()
    }

    #[getter]
    fn max_val(&self) -> f64 {
        self.inner.max_val()
    }

    fn is_within_bounds(&self) -> bool {
        self.inner.is_within_bounds()
    }

    fn __repr__(&self) -> String {
        format!(
            "Parameter(name={:?}, value={:e}, min_val={:e}, max_val={:e})",
            self.inner.name(),
            self.inner.value(),
            self.inner.min_val(),
            self.inner.max_val()
        )
    }
}

#[pyclass(name = "Target")]
#[derive(Clone, Debug)]
pub struct PyTarget {
    #[pyo3(get, set)]
    pub metric: String,
    #[pyo3(get, set)]
    pub value: f64,
    #[pyo3(get, set)]
    pub weight: f64,
    #[pyo3(get, set)]
    pub mode: PyTargetMode,
    #[pyo3(get, set)]
    pub unit: String,
}

#[pymethods]
impl PyTarget {
    #[new]
    #[pyo3(signature = (metric, value, weight, mode, unit=String::new()))]
    fn new(metric: String, value: f64, weight: f64, mode: PyTargetMode, unit: String) -> Self {
        Self {
            metric,
            value,
            weight,
            mode,
            unit,
        }
    }
}

impl From<&PyTarget> for Target {
    fn from(t: &PyTarget) -> Self {
        Target::new(t.metric.clone(), t.value, t.weight, t.mode.into(), t.unit.clone())
    }
}

#[pyclass(name = "Test")]
#[derive(Clone, Debug)]
pub struct PyTest {
    #[pyo3(get, set)]
    pub name: String,
    #[pyo3(get, set)]
    pub spice_code: String,
    #[pyo3(get, set)]
    pub description: String,
    #[pyo3(get)]
    pub environment: Vec<PyEnvironment>,
    #[pyo3(get, set)]
    pub metrics: Vec<String>,
}

#[pymethods]
impl PyTest {
    #[new]
    #[pyo3(signature = (name, environment, spice_code, description=String::new(), metrics=Vec::new()))]
    fn new(
        name: String,
        environment: Vec<PyEnvironment>,
        spice_code: String,
        description: String,
        metrics: Vec<String>,
    ) -> Self {
        Self {
            name,
            spice_code,
            description,
            environment,
            metrics,
        }
    }
}

impl From<&PyTest> for Test {
    fn from(t: &PyTest) -> Self {
        let environment = t
            .environment
            .iter()
            .map(|e| Environment::new(e.name.clone(), e.value.clone()))
            .collect();
        Test::new(t.name.clone(), environment, t.spice_code.clone(), t.description.clone())
            .with_metrics(t.metrics.iter().cloned())
    }
}

#[pyclass(name = "ParameterConstraint")]
#[derive(Clone, Debug)]
pub struct PyParameterConstraint {
    #[pyo3(get, set)]
    pub relationship: PyRelationshipType,
    #[pyo3(get, set)]
    pub description: String,
    #[pyo3(get, set)]
    pub expression: String,
    #[pyo3(get)]
    pub target_param: PyParameter,
    #[pyo3(get)]
    pub source_params: Vec<PyParameter>,
}

#[pymethods]
impl PyParameterConstraint {
    #[new]
    #[pyo3(signature = (target_param, source_params, expression, relationship=PyRelationshipType::Equals, description=String::new()))]
    fn new(
        target_param: PyParameter,
        source_params: Vec<PyParameter>,
        expression: String,
        relationship: PyRelationshipType,
        description: String,
    ) -> Self {
        Self {
            relationship,
            description,
            expression,
            target_param,
            source_params,
        }
    }
}

impl From<&PyParameterConstraint> for ParameterConstraint {
    fn from(c: &PyParameterConstraint) -> Self {
        ParameterConstraint::new(
            c.target_param.inner.name(),
            c.source_params.iter().map(|p| p.inner.name().to_string()),
            c.expression.clone(),
            c.relationship.into(),
            c.description.clone(),
        )
    }
}

// ===== RESULTS =====

#[pyclass(name = "OptimizationResult")]
#[derive(Clone, Debug)]
pub struct PyOptimizationResult {
    inner: OptimizationResult,
}

#[pymethods]
impl PyOptimizationResult {
    #[getter]
    fn success(&self) -> bool {
        self.inner.success
    }

    #[getter]
    fn cost(&self) -> f64 {
        self.inner.cost
    }

    #[getter]
    fn iterations(&self) -> u32 {
        self.inner.iterations
    }

    #[getter]
    fn message(&self) -> String {
        self.inner.message.clone()
    }

    #[getter]
    fn parameters(&self) -> Vec<PyParameter> {
        self.inner
            .parameters
            .iter()
            .map(|p| PyParameter { inner: p.clone() })
            .collect()
    }

    #[getter]
    fn state(&self) -> String {
        self.inner.state.to_string()
    }

    #[getter]
    fn stop_reason(&self) -> String {
        self.inner.stop_reason.to_string()
    }

    #[getter]
    fn cost_evals(&self) -> usize {
        self.inner.cost_evals
    }

    #[getter]
    fn failed_evals(&self) -> usize {
        self.inner.failed_evals
    }

    #[getter]
    fn history(&self) -> Vec<f64> {
        self.inner.history.clone()
    }

    fn get_parameter(&self, name: &str) -> Option<PyParameter> {
        self.inner
            .get_parameter(name)
            .map(|p| PyParameter { inner: p.clone() })
    }

    fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        format!(
            "OptimizationResult(success={}, cost={:e}, iterations={}, message={:?})",
            self.inner.success, self.inner.cost, self.inner.iterations, self.inner.message
        )
    }
}

// ===== OPTIMIZER =====

#[pyclass(name = "Optimizer")]
pub struct PyOptimizer {
    #[pyo3(get, set)]
    pub circuit: String,
    #[pyo3(get, set)]
    pub template: String,
    #[pyo3(get, set)]
    pub solver: String,
    #[pyo3(get, set)]
    pub max_iterations: u32,
    #[pyo3(get, set)]
    pub precision: f64,
    #[pyo3(get, set)]
    pub verbose: bool,
    #[pyo3(get, set)]
    pub seed: Option<u64>,
    #[pyo3(get, set)]
    pub workers: Option<usize>,
}

#[pymethods]
impl PyOptimizer {
    #[new]
    #[pyo3(signature = (circuit="".to_string(), template=".".to_string(), solver="auto".to_string(), max_iterations=1000, precision=1e-6, verbose=false, seed=None, workers=None))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        circuit: String,
        template: String,
        solver: String,
        max_iterations: u32,
        precision: f64,
        verbose: bool,
        seed: Option<u64>,
        workers: Option<usize>,
    ) -> Self {
        Self {
            circuit,
            template,
            solver,
            max_iterations,
            precision,
            verbose,
            seed,
            workers,
        }
    }

    fn optimize(
        &self,
        py: Python<'_>,
        parameters: Vec<PyParameter>,
        tests: Vec<PyTest>,
        targets: Vec<PyTarget>,
        constraints: Vec<PyParameterConstraint>,
    ) -> PyResult<PyOptimizationResult> {
        let config = self.config()?;
        crate::logging::init_logging(config.verbose);

        let parameters: Vec<Parameter> = parameters.into_iter().map(|p| p.inner).collect();
        let tests: Vec<Test> = tests.iter().map(Test::from).collect();
        let targets: Vec<Target> = targets.iter().map(Target::from).collect();
        let constraints: Vec<ParameterConstraint> =
            constraints.iter().map(ParameterConstraint::from).collect();

        let result = py.allow_threads(move || -> crate::error::Result<OptimizationResult> {
            let optimizer = Optimizer::with_ngspice(config)?;
            optimizer.optimize(&parameters, &tests, &targets, &constraints)
        });

        result
            .map(|inner| PyOptimizationResult { inner })
            .map_err(to_py_err)
    }
}

impl PyOptimizer {
    fn config(&self) -> PyResult<OptimizerConfig> {
        let solver: SolverKind = self.solver.parse().map_err(to_py_err)?;
        let defaults = OptimizerConfig::default();
        let config = OptimizerConfig {
            circuit: self.circuit.clone(),
            template: PathBuf::from(&self.template),
            solver,
            max_iterations: self.max_iterations,
            precision: self.precision,
            verbose: self.verbose,
            seed: self.seed,
            workers: self.workers.unwrap_or(defaults.workers),
            ..defaults
        };
        config.validate().map_err(to_py_err)?;
        Ok(config)
    }
}

#[pymodule]
fn circuitopt(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core types
    m.add_class::<PyTargetMode>()?;
    m.add_class::<PyRelationshipType>()?;
    m.add_class::<PyEnvironment>()?;
    m.add_class::<PyParameter>()?;
    m.add_class::<PyTarget>()?;
    m.add_class::<PyTest>()?;
    m.add_class::<PyParameterConstraint>()?;

    // Main optimizer
    m.add_class::<PyOptimizer>()?;

    // Output results
    m.add_class::<PyOptimizationResult>()?;

    Ok(())
}
