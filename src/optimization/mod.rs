pub mod callback;
pub mod controller;
pub mod cost;
pub mod problem;
pub mod solvers;

pub use callback::ProgressCallback;
pub use controller::{SearchController, SearchState, StopReason};
pub use cost::{CostBreakdown, CostModel, CostSettings, CostShape};
pub use problem::CircuitProblem;
pub use solvers::{build_solver, select_solver, NewtonOptimizer, ParticleOptimizer};
pub use solvers::{OptimizationCallback, Problem, Solver, SolverResult};
