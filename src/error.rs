use std::time::Duration;
use thiserror::Error;

/// Failures while compiling or evaluating a constraint expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown identifier '{name}'. Available parameters: [{available}]")]
    UnknownReference { name: String, available: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Expression produced a non-finite value")]
    NonFinite,

    #[error("Parameter count mismatch: expected {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// Failures reported by a simulation adapter for one candidate/test pair.
///
/// Every variant is recoverable: the evaluation layer turns it into a
/// penalty cost for the affected candidate.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Simulation did not converge: {0}")]
    NonConvergence(String),

    #[error("Simulator exited with {status}: {stderr}")]
    Crashed { status: String, stderr: String },

    #[error("Simulation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Simulation cancelled")]
    Cancelled,

    #[error("Run deadline reached before the simulation finished")]
    DeadlineReached,

    #[error("Simulation produced no measurements for test '{0}'")]
    NoMetrics(String),

    #[error("Simulator IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal setup errors. Raised before the first iteration; the run never starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cyclic dependency detected involving parameter '{0}'")]
    Cycle(String),

    #[error("Constraint on '{target}': expression '{expression}' references '{name}', which is not one of its source parameters")]
    UnknownReference {
        target: String,
        expression: String,
        name: String,
    },

    #[error("Constraint references unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Parameter '{0}' is the target of more than one constraint")]
    MultipleConstraints(String),

    #[error("No free parameters: every parameter is derived by a constraint")]
    NoFreeParameters,

    #[error("Target metric '{0}' is not produced by any test")]
    MetricMismatch(String),

    #[error("Parameter '{name}' has invalid bounds [{min}, {max}]")]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error("Target '{metric}' is invalid: {reason}")]
    InvalidTarget { metric: String, reason: String },

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Failed to resolve '{target}' in the initial configuration: {source}")]
    Expression {
        target: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Template netlist '{circuit}' not found under {template}")]
    TemplateNotFound { circuit: String, template: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level error for the optimizer entry points.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::Cycle("XM1_W".into());
        assert!(err.to_string().contains("XM1_W"));

        let err = SimError::Timeout(Duration::from_secs(3));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ConfigError::NoFreeParameters.into();
        match err {
            Error::Config(ConfigError::NoFreeParameters) => (),
            other => panic!("Expected Config variant, got {other:?}"),
        }

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "ngspice");
        let err: SimError = io_err.into();
        assert!(matches!(err, SimError::Io(_)));
    }
}
