//! Simulation adapter contract.
//!
//! The core never talks to a simulator directly: it hands a [`SimulationRequest`]
//! to a [`Simulator`] and gets back a metric map or a recoverable [`SimError`].

pub mod netlist;
pub mod ngspice;
pub mod template;

use crate::core::Test;
use crate::error::SimError;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use ngspice::NgSpiceProcess;

/// Measured metrics keyed by normalised name.
pub type MetricMap = IndexMap<String, f64>;

/// Full parameter assignment, in input parameter order.
pub type Assignment = IndexMap<String, f64>;

/// Canonical metric key: trimmed, upper-case, without a trailing `_val`.
///
/// `dc_gain_val`, `DC_GAIN` and ` dc_gain ` all map to `DC_GAIN`.
pub fn normalize_metric_name(name: &str) -> String {
    let upper = name.trim().to_uppercase();
    match upper.strip_suffix("_VAL") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => upper,
    }
}

/// Cooperative cancellation flag shared between the caller, the controller and workers.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    DeadlineReached,
}

impl From<AbortReason> for SimError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::Cancelled => SimError::Cancelled,
            AbortReason::DeadlineReached => SimError::DeadlineReached,
        }
    }
}

/// Run-wide limits every simulation call must honour.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    pub call_timeout: Option<Duration>,
}

impl RunControl {
    pub fn should_abort(&self) -> Option<AbortReason> {
        if self.cancel.is_cancelled() {
            return Some(AbortReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(AbortReason::DeadlineReached),
            _ => None,
        }
    }

    /// Time a single call may take: the per-call timeout, cut short by the run deadline.
    pub fn call_budget(&self) -> Option<Duration> {
        let remaining = self
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()));
        match (self.call_timeout, remaining) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// One candidate/test pair to simulate.
pub struct SimulationRequest<'a> {
    pub template: &'a str,
    pub assignment: &'a Assignment,
    pub test: &'a Test,
    pub control: &'a RunControl,
}

/// Executes one test under one parameter assignment.
///
/// Implementations must be safe to call from several worker threads at once;
/// each call gets its own isolated workspace.
pub trait Simulator: Send + Sync {
    fn submit(&self, request: &SimulationRequest<'_>) -> Result<MetricMap, SimError>;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Simulator for F
where
    F: Fn(&SimulationRequest<'_>) -> Result<MetricMap, SimError> + Send + Sync,
{
    fn submit(&self, request: &SimulationRequest<'_>) -> Result<MetricMap, SimError> {
        self(request)
    }
}
