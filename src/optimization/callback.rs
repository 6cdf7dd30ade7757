use super::controller::StopReason;
use super::solvers::traits::OptimizationCallback;
use crate::core::OptimizationResult;
use crate::simulation::{AbortReason, RunControl};
use tracing::{debug, info};

/// Iteration result for tracking optimization progress
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub iteration: u32,
    pub params: Vec<f64>,
    pub cost: f64,
}

/// Tracks history, reports progress and relays cancellation to the solver.
pub struct ProgressCallback {
    verbose: bool,
    max_iterations: u32,
    history: Vec<IterationResult>,
    param_names: Vec<String>,
    control: RunControl,
}

impl ProgressCallback {
    /// `param_names` name the free parameters, in solver order.
    pub fn new(verbose: bool, max_iterations: u32, param_names: Vec<String>, control: RunControl) -> Self {
        Self {
            verbose,
            max_iterations,
            history: Vec::new(),
            param_names,
            control,
        }
    }

    /// Get iteration history
    pub fn history(&self) -> &[IterationResult] {
        &self.history
    }

    fn format_params(&self, params: &[f64]) -> String {
        self.param_names
            .iter()
            .zip(params)
            .map(|(name, value)| format!("{}={:.6e}", name, value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Log the optimization summary
    pub fn log_summary(&self, result: &OptimizationResult) {
        info!(
            success = result.success,
            state = %result.state,
            cost = result.cost,
            iterations = result.iterations,
            cost_evals = result.cost_evals,
            failed_evals = result.failed_evals,
            "{}",
            result.message
        );
        if self.verbose {
            for param in &result.parameters {
                info!("  {} = {:.6e}", param.name(), param.value());
            }
        }
    }
}

impl OptimizationCallback for ProgressCallback {
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) {
        if self.verbose {
            info!(
                "Iter {:4}/{}: cost = {:.6e}  {}",
                iteration,
                self.max_iterations,
                cost,
                self.format_params(params)
            );
        } else {
            debug!(iteration, cost, "iteration complete");
        }

        self.history.push(IterationResult {
            iteration,
            params: params.to_vec(),
            cost,
        });
    }

    fn should_stop(&self) -> Option<StopReason> {
        self.control.should_abort().map(|reason| match reason {
            AbortReason::Cancelled => StopReason::Cancelled,
            AbortReason::DeadlineReached => StopReason::TimedOut,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_history_and_stop_reasons() {
        let control = RunControl::default();
        let mut callback = ProgressCallback::new(false, 10, vec!["W".into()], control.clone());

        callback.on_iteration(1, &[2.0], 0.5);
        callback.on_iteration(2, &[3.0], 0.25);
        assert_eq!(callback.history().len(), 2);
        assert_eq!(callback.history()[1].cost, 0.25);
        assert_eq!(callback.should_stop(), None);

        control.cancel.cancel();
        assert_eq!(callback.should_stop(), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_deadline_maps_to_timeout() {
        let control = RunControl {
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            ..RunControl::default()
        };
        let callback = ProgressCallback::new(true, 10, vec![], control);
        assert_eq!(callback.should_stop(), Some(StopReason::TimedOut));
    }

    #[test]
    fn test_format_params() {
        let callback = ProgressCallback::new(true, 1, vec!["A".into(), "B".into()], RunControl::default());
        assert_eq!(callback.format_params(&[1.0, 2.5]), "A=1.000000e0 B=2.500000e0");
    }
}
