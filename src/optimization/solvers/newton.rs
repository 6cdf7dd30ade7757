use super::traits::{Incumbent, OptimizationCallback, Problem, Solver, SolverResult};
use crate::config::NewtonSettings;
use crate::optimization::controller::StopReason;
use tracing::debug;

/// Adaptive gradient optimizer with backtracking line search and step adaptation
///
/// Works in range-normalised coordinates (every parameter mapped onto [0, 1]),
/// so one step size serves parameters of very different magnitudes.
pub struct NewtonOptimizer {
    max_iter: u32,
    precision: f64,
    learning_rate: f64,
    min_learning_rate: f64,
    max_learning_rate: f64,
    fd_step: f64,
    backtrack_factor: f64, // Line search backtracking
    increase_factor: f64,  // Learning rate increase when successful
    max_backtracks: u32,
}

/// Affine map between raw parameter values and the unit cube.
struct UnitScale<'a> {
    bounds: &'a [(f64, f64)],
}

impl UnitScale<'_> {
    fn to_unit(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.bounds)
            .map(|(&x, &(min, max))| {
                let range = max - min;
                if range > 0.0 {
                    ((x - min) / range).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn to_raw(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(self.bounds)
            .map(|(&u, &(min, max))| (min + u.clamp(0.0, 1.0) * (max - min)).clamp(min, max))
            .collect()
    }

    fn is_fixed(&self, i: usize) -> bool {
        let (min, max) = self.bounds[i];
        max - min <= 0.0
    }
}

impl NewtonOptimizer {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self::from_settings(max_iter, precision, &NewtonSettings::default())
    }

    pub fn from_settings(max_iter: u32, precision: f64, settings: &NewtonSettings) -> Self {
        Self {
            max_iter,
            precision,
            learning_rate: settings.initial_step,
            min_learning_rate: settings.min_step,
            max_learning_rate: settings.max_step,
            fd_step: settings.fd_step,
            backtrack_factor: settings.backtrack_factor,
            increase_factor: settings.increase_factor,
            max_backtracks: settings.max_backtracks,
        }
    }

    /// Finite-difference gradient in unit coordinates.
    ///
    /// Central differences inside the box, one-sided at a bound. All probes
    /// go out as one batch.
    fn compute_gradient(
        &self,
        problem: &dyn Problem,
        scale: &UnitScale<'_>,
        point: &[f64],
        best: &mut Incumbent,
        cost_evals: &mut usize,
    ) -> Vec<f64> {
        let n = point.len();
        let mut probes = Vec::with_capacity(2 * n);
        let mut spans = vec![0.0; n];
        let mut probed = Vec::with_capacity(n);

        for i in 0..n {
            if scale.is_fixed(i) {
                continue;
            }
            let plus = (point[i] + self.fd_step).min(1.0);
            let minus = (point[i] - self.fd_step).max(0.0);
            if plus <= minus {
                continue;
            }
            let mut p_plus = point.to_vec();
            let mut p_minus = point.to_vec();
            p_plus[i] = plus;
            p_minus[i] = minus;
            probes.push(scale.to_raw(&p_plus));
            probes.push(scale.to_raw(&p_minus));
            spans[i] = plus - minus;
            probed.push(i);
        }

        let mut grad = vec![0.0; n];
        if probes.is_empty() {
            return grad;
        }

        let costs = problem.evaluate_batch(&probes);
        *cost_evals += probes.len();
        for (probe, &cost) in probes.iter().zip(&costs) {
            best.observe(probe, cost);
        }

        for (k, &i) in probed.iter().enumerate() {
            grad[i] = (costs[2 * k] - costs[2 * k + 1]) / spans[i];
        }
        grad
    }
}

impl Solver for NewtonOptimizer {
    fn name(&self) -> &str {
        "AdaptiveNewton"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> SolverResult {
        let scale = UnitScale {
            bounds: problem.bounds(),
        };

        let mut point = scale.to_unit(problem.initial_params());
        let start = scale.to_raw(&point);
        let mut best = Incumbent::new(&start);

        let mut cost = problem.cost(&start);
        let mut cost_evals = 1;
        best.observe(&start, cost);

        if best.cost <= self.precision {
            return best.into_result(StopReason::Converged, 0, cost_evals);
        }
        if let Some(reason) = callback.should_stop() {
            return best.into_result(reason, 0, cost_evals);
        }

        let mut step = self.learning_rate;

        for iter in 1..=self.max_iter {
            let gradient = self.compute_gradient(problem, &scale, &point, &mut best, &mut cost_evals);
            if let Some(reason) = callback.should_stop() {
                callback.on_iteration(iter, &best.params, best.cost);
                return best.into_result(reason, iter, cost_evals);
            }

            let usable = gradient.iter().all(|g| g.is_finite());
            let flat = gradient.iter().all(|&g| g == 0.0);

            // Backtracking line search against the gradient
            let mut accepted = None;
            let mut tries = 0;
            if usable && !flat {
                while step >= self.min_learning_rate && tries < self.max_backtracks {
                    let trial: Vec<f64> = point
                        .iter()
                        .zip(&gradient)
                        .map(|(&u, &g)| (u - step * g).clamp(0.0, 1.0))
                        .collect();
                    let raw = scale.to_raw(&trial);
                    let trial_cost = problem.cost(&raw);
                    cost_evals += 1;
                    best.observe(&raw, trial_cost);

                    if trial_cost < cost {
                        accepted = Some((trial, trial_cost));
                        break;
                    }
                    step *= self.backtrack_factor;
                    tries += 1;
                    if callback.should_stop().is_some() {
                        break;
                    }
                }
            }

            let delta = match accepted {
                Some((trial, trial_cost)) => {
                    // Adapt learning rate based on progress
                    if tries == 0 {
                        step = (step * self.increase_factor).min(self.max_learning_rate);
                    }
                    let delta = cost - trial_cost;
                    point = trial;
                    cost = trial_cost;
                    delta
                }
                None => 0.0,
            };

            debug!(iteration = iter, cost, step, backtracks = tries, "newton step");
            callback.on_iteration(iter, &best.params, best.cost);

            if best.cost <= self.precision {
                return best.into_result(StopReason::Converged, iter, cost_evals);
            }
            if !usable || flat || delta.abs() < self.precision {
                return best.into_result(StopReason::Stalled, iter, cost_evals);
            }
            if step < self.min_learning_rate {
                return best.into_result(StopReason::StepUnderflow, iter, cost_evals);
            }
            if let Some(reason) = callback.should_stop() {
                return best.into_result(reason, iter, cost_evals);
            }
        }

        best.into_result(StopReason::MaxIterations, self.max_iter, cost_evals)
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::testing::{FnProblem, Recorder};
    use super::*;
    use std::sync::atomic::Ordering;

    /// One-sided shortfall against a lower limit of 5, as a cost model would score it.
    fn shortfall(x: &[f64]) -> f64 {
        ((5.0 - x[0]) / 5.0).max(0.0)
    }

    #[test]
    fn test_reaches_feasible_region() {
        let problem = FnProblem::new(shortfall, vec![1.0], vec![(1.0, 10.0)]);
        let mut recorder = Recorder::default();
        let result = NewtonOptimizer::new(50, 0.01).solve(&problem, &mut recorder);

        assert_eq!(result.stop_reason, StopReason::Converged);
        assert!(result.cost <= 0.01);
        assert!(result.params[0] >= 4.95 && result.params[0] <= 10.0);
        assert_eq!(result.iterations, *recorder.iterations.last().unwrap());
        assert_eq!(result.cost_evals, problem.evals.load(Ordering::SeqCst));
    }

    #[test]
    fn test_converged_start_needs_no_iterations() {
        let problem = FnProblem::new(shortfall, vec![7.0], vec![(1.0, 10.0)]);
        let mut recorder = Recorder::default();
        let result = NewtonOptimizer::new(50, 0.01).solve(&problem, &mut recorder);

        assert_eq!(result.stop_reason, StopReason::Converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.cost_evals, 1);
        assert!(recorder.iterations.is_empty());
    }

    #[test]
    fn test_single_iteration_budget() {
        let problem = FnProblem::new(|x: &[f64]| 1.0 + (x[0] - 3.0).powi(2), vec![8.0], vec![(0.0, 10.0)]);
        let result = NewtonOptimizer::new(1, 0.0).solve(&problem, &mut Recorder::default());

        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(result.iterations, 1);
        assert!(result.cost < 26.0);
    }

    #[test]
    fn test_flat_cost_stalls() {
        let problem = FnProblem::new(|_: &[f64]| 2.0, vec![1.0, 1.0], vec![(0.0, 2.0); 2]);
        let result = NewtonOptimizer::new(20, 1e-6).solve(&problem, &mut Recorder::default());

        assert_eq!(result.stop_reason, StopReason::Stalled);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.cost, 2.0);
    }

    #[test]
    fn test_gradient_probes_count_as_candidates() {
        // Only the probe just above the start improves; the step itself overshoots.
        let problem = FnProblem::new(
            |x: &[f64]| if x[0] > 0.5 && x[0] < 0.52 { 0.0 } else { 1.0 + x[0] },
            vec![0.5],
            vec![(0.0, 100.0)],
        );
        let result = NewtonOptimizer::new(5, 1e-9).solve(&problem, &mut Recorder::default());

        assert_eq!(result.stop_reason, StopReason::Converged);
        assert_eq!(result.cost, 0.0);
        assert!(result.params[0] > 0.5 && result.params[0] < 0.52);
    }

    #[test]
    fn test_stop_request_honoured() {
        let problem = FnProblem::new(|x: &[f64]| (x[0] - 3.0).powi(2) + 1.0, vec![9.0], vec![(0.0, 10.0)]);
        let mut recorder = Recorder {
            stop_after: Some(1),
            ..Recorder::default()
        };
        let result = NewtonOptimizer::new(100, 0.0).solve(&problem, &mut recorder);

        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.iterations, 1);
        assert!(result.cost < 37.0);
    }
}
