use crate::error::ConfigError;
use crate::optimization::cost::CostSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Search strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Pso,
    Newton,
    /// Choose from the shape of the search space.
    #[default]
    Auto,
}

impl FromStr for SolverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pso" | "particle" => Ok(Self::Pso),
            "newton" => Ok(Self::Newton),
            "auto" | "" => Ok(Self::Auto),
            other => Err(ConfigError::InvalidOption(format!(
                "unknown solver '{}' (expected pso, newton or auto)",
                other
            ))),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pso => "pso",
            Self::Newton => "newton",
            Self::Auto => "auto",
        })
    }
}

/// Particle swarm hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsoSettings {
    pub population_size: usize,
    pub inertia: f64,
    pub cognitive: f64,
    pub social: f64,
    /// Maximum speed per iteration as a fraction of each parameter's range.
    pub velocity_limit: f64,
    /// Stop after this many iterations without global-best improvement.
    pub stagnation_limit: Option<u32>,
}

impl Default for PsoSettings {
    fn default() -> Self {
        Self {
            population_size: 20,
            inertia: 0.7,
            cognitive: 1.5,
            social: 1.5,
            velocity_limit: 0.2,
            stagnation_limit: None,
        }
    }
}

/// Gradient-step hyperparameters. Step sizes are in range-normalised units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Finite-difference perturbation.
    pub fd_step: f64,
    pub backtrack_factor: f64,
    pub increase_factor: f64,
    pub max_backtracks: u32,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            initial_step: 0.1,
            min_step: 1e-6,
            max_step: 1.0,
            fd_step: 1e-4,
            backtrack_factor: 0.5,
            increase_factor: 1.2,
            max_backtracks: 10,
        }
    }
}

/// Construction-time options for an [`Optimizer`](crate::Optimizer).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Circuit identifier: a netlist path relative to `template`, or a schematic name.
    pub circuit: String,
    /// Template directory searched for the circuit netlist.
    pub template: PathBuf,
    pub solver: SolverKind,
    pub max_iterations: u32,
    /// Convergence threshold on cost.
    pub precision: f64,
    pub verbose: bool,
    /// Concurrent simulation workers.
    pub workers: usize,
    pub simulation_timeout_secs: Option<f64>,
    pub run_timeout_secs: Option<f64>,
    pub seed: Option<u64>,
    /// Manufacturing grid for resolved values, e.g. 5e-9.
    pub grid: Option<f64>,
    pub pso: PsoSettings,
    pub newton: NewtonSettings,
    pub cost: CostSettings,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            circuit: String::new(),
            template: PathBuf::from("."),
            solver: SolverKind::Auto,
            max_iterations: 1000,
            precision: 1e-6,
            verbose: false,
            workers: num_cpus::get(),
            simulation_timeout_secs: None,
            run_timeout_secs: None,
            seed: None,
            grid: None,
            pso: PsoSettings::default(),
            newton: NewtonSettings::default(),
            cost: CostSettings::default(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidOption(msg.into())
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be a positive number, got {}", name, value)))
    }
}

fn check_duration(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    check_positive(name, secs)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| invalid(format!("{} = {} is not a representable duration: {}", name, secs, e)))
}

impl OptimizerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be a positive integer"));
        }
        if !self.precision.is_finite() || self.precision < 0.0 {
            return Err(invalid(format!(
                "precision must be a finite, non-negative number, got {}",
                self.precision
            )));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if let Some(t) = self.simulation_timeout_secs {
            check_duration("simulation_timeout_secs", t)?;
        }
        if let Some(t) = self.run_timeout_secs {
            let timeout = check_duration("run_timeout_secs", t)?;
            if Instant::now().checked_add(timeout).is_none() {
                return Err(invalid(format!("run_timeout_secs is too large: {}", t)));
            }
        }
        if let Some(g) = self.grid {
            check_positive("grid", g)?;
        }

        let pso = &self.pso;
        if pso.population_size == 0 {
            return Err(invalid("pso.population_size must be at least 1"));
        }
        for (name, value) in [
            ("pso.inertia", pso.inertia),
            ("pso.cognitive", pso.cognitive),
            ("pso.social", pso.social),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{} must be non-negative, got {}", name, value)));
            }
        }
        check_positive("pso.velocity_limit", pso.velocity_limit)?;

        let newton = &self.newton;
        check_positive("newton.initial_step", newton.initial_step)?;
        check_positive("newton.min_step", newton.min_step)?;
        check_positive("newton.max_step", newton.max_step)?;
        check_positive("newton.fd_step", newton.fd_step)?;
        if newton.min_step > newton.max_step {
            return Err(invalid("newton.min_step must not exceed newton.max_step"));
        }
        if !(newton.backtrack_factor > 0.0 && newton.backtrack_factor < 1.0) {
            return Err(invalid("newton.backtrack_factor must lie in (0, 1)"));
        }
        if !(newton.increase_factor >= 1.0 && newton.increase_factor.is_finite()) {
            return Err(invalid("newton.increase_factor must be >= 1"));
        }
        if newton.max_backtracks == 0 {
            return Err(invalid("newton.max_backtracks must be at least 1"));
        }

        let cost = &self.cost;
        check_positive("cost.missing_metric_residual", cost.missing_metric_residual)?;
        check_positive("cost.simulation_failure_penalty", cost.simulation_failure_penalty)?;
        check_positive("cost.zero_target_scale", cost.zero_target_scale)?;
        Ok(())
    }

    /// Per-call budget; `None` when unset or not representable.
    pub fn simulation_timeout(&self) -> Option<Duration> {
        self.simulation_timeout_secs
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }

    /// Wall-clock instant at which a run started now must stop.
    pub fn run_deadline(&self) -> Option<Instant> {
        self.run_timeout().and_then(|t| Instant::now().checked_add(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.pso.population_size, 20);
        assert_eq!(config.newton.initial_step, 0.1);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_json_with_partial_fields() {
        let config = OptimizerConfig::from_json_str(
            r#"{
                "circuit": "opamp_tb.sch",
                "template": "designs/opamp",
                "solver": "newton",
                "max_iterations": 50,
                "precision": 0.01,
                "pso": { "population_size": 32 },
                "cost": { "shape": "squared" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.solver, SolverKind::Newton);
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.pso.population_size, 32);
        assert_eq!(config.pso.inertia, 0.7);
        assert_eq!(config.template, PathBuf::from("designs/opamp"));
        assert_eq!(config.cost.shape, crate::optimization::cost::CostShape::Squared);
    }

    #[test]
    fn test_rejects_bad_options() {
        assert!(matches!(
            OptimizerConfig::from_json_str(r#"{"max_iterations": 0}"#),
            Err(ConfigError::InvalidOption(_))
        ));
        assert!(matches!(
            OptimizerConfig::from_json_str(r#"{"precision": -1.0}"#),
            Err(ConfigError::InvalidOption(_))
        ));
        assert!(matches!(
            OptimizerConfig::from_json_str(r#"{"solver": "cmaes"}"#),
            Err(ConfigError::Json(_))
        ));
        let zero_precision = OptimizerConfig {
            precision: 0.0,
            ..OptimizerConfig::default()
        };
        assert!(zero_precision.validate().is_ok());
    }

    #[test]
    fn test_rejects_unrepresentable_timeouts() {
        for config in [
            OptimizerConfig {
                simulation_timeout_secs: Some(1e30),
                ..OptimizerConfig::default()
            },
            OptimizerConfig {
                run_timeout_secs: Some(1e30),
                ..OptimizerConfig::default()
            },
            OptimizerConfig {
                run_timeout_secs: Some(f64::INFINITY),
                ..OptimizerConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::InvalidOption(_))));
            assert!(config.run_deadline().is_none());
        }

        let bounded = OptimizerConfig {
            simulation_timeout_secs: Some(2.5),
            run_timeout_secs: Some(60.0),
            ..OptimizerConfig::default()
        };
        assert!(bounded.validate().is_ok());
        assert_eq!(bounded.simulation_timeout(), Some(Duration::from_millis(2500)));
        assert!(bounded.run_deadline().is_some());
    }

    #[test]
    fn test_solver_kind_from_str() {
        assert_eq!("PSO".parse::<SolverKind>().unwrap(), SolverKind::Pso);
        assert_eq!("newton".parse::<SolverKind>().unwrap(), SolverKind::Newton);
        assert_eq!("auto".parse::<SolverKind>().unwrap(), SolverKind::Auto);
        assert!("simplex".parse::<SolverKind>().is_err());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"solver": "pso", "seed": 11}"#).unwrap();

        let config = OptimizerConfig::from_path(&path).unwrap();
        assert_eq!(config.solver, SolverKind::Pso);
        assert_eq!(config.seed, Some(11));
    }
}
