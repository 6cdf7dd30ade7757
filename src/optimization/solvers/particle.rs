use super::traits::{clamp_params, Incumbent, OptimizationCallback, Problem, Solver, SolverResult};
use crate::config::PsoSettings;
use crate::optimization::controller::StopReason;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Particle Swarm Optimization - often outperforms gradient-based methods
/// for noisy, non-convex problems with fewer cost evaluations
pub struct ParticleOptimizer {
    max_iter: u32,
    precision: f64,
    population_size: usize,
    inertia: f64,   // w - velocity inertia weight
    cognitive: f64, // c1 - personal best influence
    social: f64,    // c2 - global best influence
    velocity_limit: f64,
    stagnation_limit: Option<u32>,
    seed: Option<u64>,
}

impl ParticleOptimizer {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self::from_settings(max_iter, precision, &PsoSettings::default())
    }

    pub fn from_settings(max_iter: u32, precision: f64, settings: &PsoSettings) -> Self {
        Self {
            max_iter,
            precision,
            population_size: settings.population_size.max(1),
            inertia: settings.inertia,
            cognitive: settings.cognitive,
            social: settings.social,
            velocity_limit: settings.velocity_limit,
            stagnation_limit: settings.stagnation_limit,
            seed: None,
        }
    }

    /// Configure swarm size (default: 20)
    pub fn with_population_size(mut self, size: usize) -> Self {
        self.population_size = size.max(1);
        self
    }

    /// Fixed seed for a reproducible swarm; entropy otherwise.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn population_size(&self) -> usize {
        self.population_size
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Initialize particle positions uniformly within bounds
    fn initialize_particles(
        &self,
        rng: &mut StdRng,
        bounds: &[(f64, f64)],
        initial_params: &[f64],
    ) -> Vec<Vec<f64>> {
        let mut particles = Vec::with_capacity(self.population_size);

        // First particle is the provided initial guess
        let mut first = initial_params.to_vec();
        clamp_params(&mut first, bounds);
        particles.push(first);

        // Rest are random within bounds
        for _ in 1..self.population_size {
            let particle = bounds
                .iter()
                .map(|&(min, max)| rng.gen_range(min..=max))
                .collect();
            particles.push(particle);
        }

        particles
    }

    /// Initialize velocities (small random values)
    fn initialize_velocities(&self, rng: &mut StdRng, bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
        (0..self.population_size)
            .map(|_| {
                bounds
                    .iter()
                    .map(|&(min, max)| {
                        let range = max - min;
                        rng.gen_range(-range * 0.1..=range * 0.1)
                    })
                    .collect()
            })
            .collect()
    }
}

impl Solver for ParticleOptimizer {
    fn name(&self) -> &str {
        "PSO"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> SolverResult {
        let n = problem.num_params();
        let bounds = problem.bounds();
        let mut rng = self.rng();

        // Initialize swarm
        let mut particles = self.initialize_particles(&mut rng, bounds, problem.initial_params());
        let mut velocities = self.initialize_velocities(&mut rng, bounds);
        let mut personal_best_positions = particles.clone();
        let mut personal_best_costs = vec![f64::INFINITY; self.population_size];

        let mut global = Incumbent::new(&particles[0]);
        let mut cost_evals = 0;
        let mut stagnation_counter = 0;

        for iter in 1..=self.max_iter {
            let prev_global_best = global.cost;

            // One barrier per iteration: every particle is scored before any moves
            let costs = problem.evaluate_batch(&particles);
            cost_evals += particles.len();

            for (p, &cost) in costs.iter().enumerate() {
                if cost < personal_best_costs[p] {
                    personal_best_costs[p] = cost;
                    personal_best_positions[p].copy_from_slice(&particles[p]);
                }
                global.observe(&particles[p], cost);
            }

            // Report progress using the global best
            callback.on_iteration(iter, &global.params, global.cost);
            debug!(iteration = iter, best_cost = global.cost, "swarm evaluated");

            if global.cost <= self.precision {
                return global.into_result(StopReason::Converged, iter, cost_evals);
            }

            // Check for stagnation
            if let Some(limit) = self.stagnation_limit {
                if prev_global_best - global.cost <= self.precision * 0.01 {
                    stagnation_counter += 1;
                    if stagnation_counter >= limit {
                        return global.into_result(StopReason::Stagnated, iter, cost_evals);
                    }
                } else {
                    stagnation_counter = 0;
                }
            }

            if let Some(reason) = callback.should_stop() {
                return global.into_result(reason, iter, cost_evals);
            }

            // Update velocities and positions for all particles
            for p in 0..self.population_size {
                for i in 0..n {
                    let r1 = rng.gen::<f64>();
                    let r2 = rng.gen::<f64>();

                    // PSO velocity update equation
                    velocities[p][i] = self.inertia * velocities[p][i]
                        + self.cognitive * r1 * (personal_best_positions[p][i] - particles[p][i])
                        + self.social * r2 * (global.params[i] - particles[p][i]);

                    // Clamp velocity to fraction of search space
                    let (min, max) = bounds[i];
                    let v_max = (max - min) * self.velocity_limit;
                    velocities[p][i] = velocities[p][i].clamp(-v_max, v_max);

                    // Update position
                    particles[p][i] += velocities[p][i];
                }

                // Clamp to bounds
                clamp_params(&mut particles[p], bounds);
            }
        }

        global.into_result(StopReason::MaxIterations, self.max_iter, cost_evals)
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::testing::{FnProblem, Recorder};
    use super::*;

    fn sphere(x: &[f64]) -> f64 {
        x.iter().map(|v| (v - 1.0).powi(2)).sum()
    }

    #[test]
    fn test_pso_converges_on_sphere() {
        let problem = FnProblem::new(sphere, vec![-4.0, 4.0], vec![(-5.0, 5.0); 2]);
        let mut recorder = Recorder::default();
        let mut solver = ParticleOptimizer::new(300, 1e-4).with_seed(Some(7));

        let result = solver.solve(&problem, &mut recorder);

        assert_eq!(result.stop_reason, StopReason::Converged);
        assert!(result.cost <= 1e-4);
        assert!(result.params.iter().all(|v| (v - 1.0).abs() < 0.02));
        assert_eq!(result.cost_evals, 20 * result.iterations as usize);
    }

    #[test]
    fn test_best_cost_never_increases() {
        let problem = FnProblem::new(sphere, vec![5.0, -5.0], vec![(-5.0, 5.0); 2]);
        let mut recorder = Recorder::default();
        let mut solver = ParticleOptimizer::new(15, 0.0).with_seed(Some(3));

        let result = solver.solve(&problem, &mut recorder);

        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(result.iterations, 15);
        assert_eq!(recorder.iterations, (1..=15).collect::<Vec<_>>());
        assert!(recorder.costs.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(result.cost, *recorder.costs.last().unwrap());
    }

    #[test]
    fn test_positions_stay_in_bounds() {
        let bounds = vec![(0.0, 1.0), (10.0, 20.0)];
        let problem = FnProblem::new(
            |x: &[f64]| {
                assert!((0.0..=1.0).contains(&x[0]));
                assert!((10.0..=20.0).contains(&x[1]));
                -x[0] - x[1]
            },
            vec![0.5, 15.0],
            bounds,
        );
        let mut solver = ParticleOptimizer::new(10, f64::NEG_INFINITY).with_seed(Some(1));
        let result = solver.solve(&problem, &mut Recorder::default());
        assert_eq!(result.iterations, 10);
    }

    #[test]
    fn test_seed_makes_runs_reproducible() {
        let run = || {
            let problem = FnProblem::new(sphere, vec![0.0, 0.0], vec![(-5.0, 5.0); 2]);
            ParticleOptimizer::new(5, 0.0)
                .with_seed(Some(42))
                .solve(&problem, &mut Recorder::default())
        };
        let (a, b) = (run(), run());
        assert_eq!(a.params, b.params);
        assert_eq!(a.cost, b.cost);
    }

    #[test]
    fn test_stop_request_returns_best_so_far() {
        let problem = FnProblem::new(sphere, vec![3.0, 3.0], vec![(-5.0, 5.0); 2]);
        let mut recorder = Recorder {
            stop_after: Some(2),
            ..Recorder::default()
        };
        let result = ParticleOptimizer::new(100, 0.0)
            .with_seed(Some(9))
            .solve(&problem, &mut recorder);

        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.cost, sphere(&result.params));
    }

    #[test]
    fn test_stagnation_limit() {
        let settings = PsoSettings {
            stagnation_limit: Some(3),
            ..PsoSettings::default()
        };
        let problem = FnProblem::new(|_: &[f64]| 1.0, vec![0.0], vec![(-1.0, 1.0)]);
        let result = ParticleOptimizer::from_settings(100, 1e-6, &settings)
            .with_seed(Some(5))
            .solve(&problem, &mut Recorder::default());

        assert_eq!(result.stop_reason, StopReason::Stagnated);
        assert_eq!(result.iterations, 4);
    }
}
