mod newton;
mod particle;
pub mod traits;

pub use newton::NewtonOptimizer;
pub use particle::ParticleOptimizer;
pub use traits::{OptimizationCallback, Problem, Solver, SolverResult};

use crate::config::{OptimizerConfig, SolverKind};

/// Build the solver named by the configuration, resolving `auto`.
///
/// Returns the solver and a human-readable reason for the choice.
pub fn build_solver(config: &OptimizerConfig, bounds: &[(f64, f64)]) -> (Box<dyn Solver>, String) {
    match config.solver {
        SolverKind::Pso => (Box::new(pso(config)), "configured: pso".to_string()),
        SolverKind::Newton => (Box::new(newton(config)), "configured: newton".to_string()),
        SolverKind::Auto => select_solver(bounds, config),
    }
}

fn pso(config: &OptimizerConfig) -> ParticleOptimizer {
    ParticleOptimizer::from_settings(config.max_iterations, config.precision, &config.pso)
        .with_seed(config.seed)
}

fn newton(config: &OptimizerConfig) -> NewtonOptimizer {
    NewtonOptimizer::from_settings(config.max_iterations, config.precision, &config.newton)
}

/// Pick a strategy from the shape of the search space.
pub fn select_solver(bounds: &[(f64, f64)], config: &OptimizerConfig) -> (Box<dyn Solver>, String) {
    let num_params = bounds.len();

    // Analyze parameter ranges
    let total_range: f64 = bounds.iter().map(|&(min, max)| max - min).sum();
    let avg_range = total_range / num_params.max(1) as f64;

    // Decision logic - prefer gradient-free methods for circuit optimization (noisy, non-convex)
    match num_params {
        // Small problems (1-2 params) with very tight bounds -> Newton
        n if n <= 2 && avg_range < 0.1 => (
            Box::new(newton(config)),
            format!(
                "auto: tiny problem ({} params, range {:.3}) -> newton (fast for smooth functions)",
                n, avg_range
            ),
        ),

        // Small to medium problems (1-8 params) -> PSO with a swarm scaled to the dimension
        n if n <= 8 => {
            let pop_size = (10 + n * 3).min(30);
            (
                Box::new(pso(config).with_population_size(pop_size)),
                format!("auto: {} params -> pso (pop={}, robust for noisy circuits)", n, pop_size),
            )
        }

        // Default -> PSO with the configured swarm
        n => (
            Box::new(pso(config)),
            format!(
                "auto: {} params -> pso (pop={}, default)",
                n, config.pso.population_size
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_kind_is_respected() {
        let config = OptimizerConfig {
            solver: SolverKind::Newton,
            ..OptimizerConfig::default()
        };
        let (solver, reason) = build_solver(&config, &[(0.0, 100.0); 4]);
        assert_eq!(solver.name(), "AdaptiveNewton");
        assert!(reason.contains("configured"));
    }

    #[test]
    fn test_auto_selection() {
        let config = OptimizerConfig {
            solver: SolverKind::Auto,
            ..OptimizerConfig::default()
        };

        let (tiny, _) = build_solver(&config, &[(1e-6, 2e-6)]);
        assert_eq!(tiny.name(), "AdaptiveNewton");

        let (medium, reason) = build_solver(&config, &[(1.0, 10.0); 3]);
        assert_eq!(medium.name(), "PSO");
        assert!(reason.contains("pop=19"));

        let (large, _) = build_solver(&config, &[(1.0, 10.0); 12]);
        assert_eq!(large.name(), "PSO");
    }
}
