use crate::core::{Target, TargetMode};
use crate::simulation::MetricMap;
use serde::{Deserialize, Serialize};

/// How per-target residuals are aggregated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostShape {
    /// cost = sum(weight * residual)
    #[default]
    Linear,
    /// cost = sum(weight * residual^2), punishing large violations harder
    Squared,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    pub shape: CostShape,
    /// Residual charged for a target whose metric was not measured. Measured
    /// residuals saturate at this value.
    pub missing_metric_residual: f64,
    /// Added once per failed simulation of a candidate.
    pub simulation_failure_penalty: f64,
    /// Normalisation scale used when a set-point is zero.
    pub zero_target_scale: f64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            shape: CostShape::Linear,
            missing_metric_residual: 1e3,
            simulation_failure_penalty: 1e3,
            zero_target_scale: 1e-3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetResidual {
    pub metric: String,
    pub measured: Option<f64>,
    pub residual: f64,
    pub weighted: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CostBreakdown {
    pub total: f64,
    pub residuals: Vec<TargetResidual>,
    pub failed_tests: usize,
}

/// Scores measured metrics against the targets.
///
/// Targets look metrics up by normalised name, so tests and targets only
/// meet at evaluation time.
///
/// Costs come in two tiers. A candidate whose every test ran and whose every
/// target was measured costs at most [`CostModel::measured_ceiling`]. A
/// candidate with a failed test or a missing metric starts from that ceiling,
/// so it never ranks ahead of a measured one.
#[derive(Clone, Debug)]
pub struct CostModel {
    targets: Vec<Target>,
    keys: Vec<String>,
    settings: CostSettings,
    measured_ceiling: f64,
}

impl CostModel {
    pub fn new(targets: Vec<Target>, settings: CostSettings) -> Self {
        let keys = targets.iter().map(Target::metric_key).collect();
        let mut model = Self {
            targets,
            keys,
            settings,
            measured_ceiling: 0.0,
        };
        let cap = model.shaped(model.settings.missing_metric_residual);
        model.measured_ceiling = model.targets.iter().map(|t| t.weight * cap).sum();
        model
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn settings(&self) -> &CostSettings {
        &self.settings
    }

    fn scale(&self, target: &Target) -> f64 {
        let magnitude = target.value.abs();
        if magnitude > f64::EPSILON {
            magnitude
        } else {
            self.settings.zero_target_scale
        }
    }

    /// Highest cost a fully measured candidate can reach.
    pub fn measured_ceiling(&self) -> f64 {
        self.measured_ceiling
    }

    /// Normalised, zero-floored shortfall of `measured` against `target`,
    /// saturating at `missing_metric_residual`.
    pub fn residual(&self, target: &Target, measured: Option<f64>) -> f64 {
        let measured = match measured {
            Some(v) if v.is_finite() => v,
            _ => return self.settings.missing_metric_residual,
        };
        let scale = self.scale(target);
        let shortfall = match target.mode {
            TargetMode::Min => target.value - measured,
            TargetMode::Max => measured - target.value,
            TargetMode::Target => (measured - target.value).abs(),
        };
        (shortfall / scale)
            .max(0.0)
            .min(self.settings.missing_metric_residual)
    }

    fn shaped(&self, residual: f64) -> f64 {
        match self.settings.shape {
            CostShape::Linear => residual,
            CostShape::Squared => residual * residual,
        }
    }

    /// Score one candidate from the metric maps its tests produced.
    ///
    /// When several tests report the same metric (corners), the worst
    /// residual counts.
    pub fn evaluate(&self, measurements: &[MetricMap], failed_tests: usize) -> CostBreakdown {
        let residuals: Vec<TargetResidual> = self
            .targets
            .iter()
            .zip(&self.keys)
            .map(|(target, key)| {
                let worst = measurements
                    .iter()
                    .filter_map(|metrics| metrics.get(key).copied())
                    .filter(|value| value.is_finite())
                    .map(|value| (value, self.residual(target, Some(value))))
                    .fold(None, |acc: Option<(f64, f64)>, cur| match acc {
                        Some(prev) if prev.1 >= cur.1 => Some(prev),
                        _ => Some(cur),
                    });
                let (measured, residual) = match worst {
                    Some((value, residual)) => (Some(value), residual),
                    None => (None, self.residual(target, None)),
                };
                TargetResidual {
                    metric: target.metric.clone(),
                    measured,
                    residual,
                    weighted: target.weight * self.shaped(residual),
                }
            })
            .collect();

        let mut total = residuals.iter().map(|r| r.weighted).sum::<f64>();
        if failed_tests > 0 || residuals.iter().any(|r| r.measured.is_none()) {
            total += self.measured_ceiling
                + failed_tests as f64 * self.settings.simulation_failure_penalty;
        }

        CostBreakdown {
            total,
            residuals,
            failed_tests,
        }
    }

    /// Cost of a candidate for which nothing could be measured.
    pub fn penalty_cost(&self, failed_tests: usize) -> f64 {
        self.evaluate(&[], failed_tests).total
    }
}
