use crate::error::ConfigError;
use crate::optimization::controller::{SearchState, StopReason};
use crate::simulation::normalize_metric_name;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ===== ENUMS =====

/// How a measured metric is compared against its set-point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMode {
    /// Satisfied when measured >= value (e.g. gain, bandwidth).
    Min,
    /// Satisfied when measured <= value (e.g. power, noise).
    Max,
    /// Satisfied only when measured == value.
    Target,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    #[default]
    Equals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl RelationshipType {
    /// Project `current` onto the set allowed by `target <rel> computed`.
    pub fn project(self, current: f64, computed: f64) -> f64 {
        match self {
            Self::Equals => computed,
            Self::GreaterThanOrEqual if current < computed => computed,
            Self::LessThanOrEqual if current > computed => computed,
            Self::GreaterThan if current <= computed => computed + STRICT_OFFSET,
            Self::LessThan if current >= computed => computed - STRICT_OFFSET,
            _ => current,
        }
    }
}

/// Margin used to satisfy strict inequalities.
const STRICT_OFFSET: f64 = 1e-6;

// ===== CORE DATA TYPES =====

/// One simulation-condition override (supply, temperature, source) scoped to a test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub value: String,
}

impl Environment {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_temperature(&self) -> bool {
        matches!(
            self.name.to_lowercase().as_str(),
            "temp" | "temperature"
        )
    }
}

/// A tunable circuit parameter. The value always lies within `[min_val, max_val]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ParameterSpec")]
pub struct Parameter {
    name: String,
    value: f64,
    min_val: f64,
    max_val: f64,
}

#[derive(Deserialize)]
struct ParameterSpec {
    name: String,
    value: f64,
    min_val: f64,
    max_val: f64,
}

impl TryFrom<ParameterSpec> for Parameter {
    type Error = ConfigError;

    fn try_from(spec: ParameterSpec) -> Result<Self, Self::Error> {
        Parameter::new(spec.name, spec.value, spec.min_val, spec.max_val)
    }
}

impl Parameter {
    /// Create a parameter; an out-of-range initial value is clamped.
    pub fn new(
        name: impl Into<String>,
        value: f64,
        min_val: f64,
        max_val: f64,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if !min_val.is_finite() || !max_val.is_finite() || min_val > max_val {
            return Err(ConfigError::InvalidBounds {
                name,
                min: min_val,
                max: max_val,
            });
        }
        let mut param = Self {
            name,
            value: min_val,
            min_val,
            max_val,
        };
        param.set_value(value);
        Ok(param)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn min_val(&self) -> f64 {
        self.min_val
    }

    pub fn max_val(&self) -> f64 {
        self.max_val
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_val, self.max_val)
    }

    /// Assign a value, clamping into bounds. Returns true if clamping was needed.
    pub fn set_value(&mut self, value: f64) -> bool {
        let clamped = self.clamp_value(value);
        self.value = clamped;
        clamped != value
    }

    pub fn clamp_value(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.min_val
        } else {
            value.clamp(self.min_val, self.max_val)
        }
    }

    pub fn with_value(&self, value: f64) -> Self {
        let mut param = self.clone();
        param.set_value(value);
        param
    }

    pub fn is_within_bounds(&self) -> bool {
        self.value >= self.min_val && self.value <= self.max_val
    }
}

/// A performance set-point for one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub metric: String,
    pub value: f64,
    pub weight: f64,
    pub mode: TargetMode,
    #[serde(default)]
    pub unit: String,
}

impl Target {
    pub fn new(
        metric: impl Into<String>,
        value: f64,
        weight: f64,
        mode: TargetMode,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            value,
            weight,
            mode,
            unit: unit.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            metric: self.metric.clone(),
            reason: reason.to_string(),
        };
        if self.metric.trim().is_empty() {
            return Err(invalid("metric name is empty"));
        }
        if !self.value.is_finite() {
            return Err(invalid("set-point is not finite"));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(invalid("weight must be finite and nonnegative"));
        }
        Ok(())
    }

    /// Normalised metric key used to look up measurements.
    pub fn metric_key(&self) -> String {
        normalize_metric_name(&self.metric)
    }
}

/// One simulation run: environment overrides plus a control script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    #[serde(default)]
    pub environment: Vec<Environment>,
    #[serde(alias = "spice_code")]
    pub script: String,
    #[serde(default)]
    pub description: String,
    /// Metrics this test is known to produce; scanned from the script when empty.
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl Test {
    pub fn new(
        name: impl Into<String>,
        environment: Vec<Environment>,
        script: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            environment,
            script: script.into(),
            description: description.into(),
            metrics: Vec::new(),
        }
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    /// Script with `{NAME}` placeholders replaced by environment values.
    pub fn rendered_script(&self) -> String {
        self.environment
            .iter()
            .fold(self.script.clone(), |code, env| {
                code.replace(&format!("{{{}}}", env.name), &env.value)
            })
    }

    /// Normalised names of the metrics this test produces, if they can be known statically.
    pub fn declared_metrics(&self) -> Option<Vec<String>> {
        if !self.metrics.is_empty() {
            return Some(self.metrics.iter().map(|m| normalize_metric_name(m)).collect());
        }

        static MEASURE: OnceLock<Regex> = OnceLock::new();
        let re = MEASURE.get_or_init(|| {
            Regex::new(
                r"(?im)^\s*(?:\.?meas(?:ure)?\s+\w+\s+([A-Za-z_]\w*)|let\s+([A-Za-z_]\w*)\s*=)",
            )
            .expect("static measurement pattern")
        });

        let found: Vec<String> = re
            .captures_iter(&self.script)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| normalize_metric_name(m.as_str()))
            .collect();

        if found.is_empty() {
            None
        } else {
            Some(found)
        }
    }
}

/// Derives `target_param` from `source_params` through `expression`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterConstraint {
    pub target_param: String,
    pub source_params: Vec<String>,
    pub expression: String,
    #[serde(default)]
    pub relationship: RelationshipType,
    #[serde(default)]
    pub description: String,
}

impl ParameterConstraint {
    pub fn new<I, S>(
        target_param: impl Into<String>,
        source_params: I,
        expression: impl Into<String>,
        relationship: RelationshipType,
        description: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_param: target_param.into(),
            source_params: source_params.into_iter().map(Into::into).collect(),
            expression: expression.into(),
            relationship,
            description: description.into(),
        }
    }

    /// Shorthand for an `Equals` constraint.
    pub fn equals<I, S>(target_param: impl Into<String>, source_params: I, expression: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            target_param,
            source_params,
            expression,
            RelationshipType::Equals,
            String::new(),
        )
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub cost: f64,
    pub iterations: u32,
    pub message: String,
    /// Resolved snapshot of the best candidate, in input parameter order.
    pub parameters: Vec<Parameter>,
    pub state: SearchState,
    pub stop_reason: StopReason,
    pub cost_evals: usize,
    pub failed_evals: usize,
    /// Best cost after each iteration.
    pub history: Vec<f64>,
}

impl OptimizationResult {
    pub fn get_parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}
