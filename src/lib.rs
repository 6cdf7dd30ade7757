//! Analog circuit design-space optimizer.
//!
//! Tunable parameters (with bounds and dependency constraints) are searched
//! by a particle swarm or a gradient-style solver. Every candidate is run
//! through a set of simulation tests, and the measured metrics are scored
//! against weighted performance targets.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod optimization;
pub mod optimizer;
pub mod simulation;

#[cfg(feature = "python")]
mod python;

pub use crate::config::{NewtonSettings, OptimizerConfig, PsoSettings, SolverKind};
pub use crate::core::*;
pub use crate::error::{ConfigError, Error, ExpressionError, Result, SimError};
pub use crate::optimization::{CostSettings, CostShape, SearchState, StopReason};
pub use crate::optimizer::{optimize, Optimizer};
pub use crate::simulation::{
    CancellationToken, MetricMap, NgSpiceProcess, SimulationRequest, Simulator,
};
