//! Baseline comparison
//!
//! A metric regresses when it got worse by more than the configured
//! threshold AND the shift is large relative to the noise in both runs:
//!
//! ```text
//! change_percent = (current - baseline) / baseline * 100
//! pooled_stddev  = sqrt((current_sd² + baseline_sd²) / 2)
//! effect_size    = |current - baseline| / pooled_stddev
//!
//! regression  <=>  change_percent > threshold * 100  &&  effect_size > 0.5
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::harness::BenchmarkStatistics;
use crate::config::RegressionConfig;
use crate::stats::Summary;

/// Cohen's d above which a shift is treated as real
pub const EFFECT_SIZE_THRESHOLD: f64 = 0.5;

/// Current success rate below `baseline * this` is a regression
pub const SUCCESS_RATE_DEGRADATION: f64 = 0.95;

pub const DURATION_METRIC: &str = "duration";
pub const MEMORY_METRIC: &str = "memory";
pub const SUCCESS_RATE_METRIC: &str = "success_rate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub current: f64,
    pub baseline: f64,
    pub change: f64,
    pub change_percent: f64,
    pub effect_size: f64,
    /// Effect size above the threshold
    pub significant: bool,
    pub regression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub regression_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub metrics: BTreeMap<String, MetricComparison>,
    pub confidence_level: f64,
}

pub struct RegressionComparator {
    regression_threshold: f64,
    confidence_level: f64,
    effect_size_threshold: f64,
    success_rate_degradation: f64,
}

impl RegressionComparator {
    pub fn new(config: &RegressionConfig) -> Self {
        Self {
            regression_threshold: config.regression_threshold,
            confidence_level: config.confidence_level,
            effect_size_threshold: EFFECT_SIZE_THRESHOLD,
            success_rate_degradation: SUCCESS_RATE_DEGRADATION,
        }
    }

    pub fn with_effect_size_threshold(mut self, threshold: f64) -> Self {
        self.effect_size_threshold = threshold;
        self
    }

    pub fn with_success_rate_degradation(mut self, factor: f64) -> Self {
        self.success_rate_degradation = factor;
        self
    }

    pub fn compare(
        &self,
        current: &BenchmarkStatistics,
        baseline: Option<&BenchmarkStatistics>,
    ) -> Comparison {
        let Some(baseline) = baseline else {
            return Comparison {
                regression_detected: false,
                message: Some("No baseline available for comparison".to_string()),
                metrics: BTreeMap::new(),
                confidence_level: self.confidence_level,
            };
        };

        let mut metrics = BTreeMap::new();
        metrics.insert(
            DURATION_METRIC.to_string(),
            self.compare_metric(&current.duration, &baseline.duration),
        );
        metrics.insert(
            MEMORY_METRIC.to_string(),
            self.compare_metric(&current.memory, &baseline.memory),
        );

        if current.success_rate < baseline.success_rate * self.success_rate_degradation {
            let change = current.success_rate - baseline.success_rate;
            metrics.insert(
                SUCCESS_RATE_METRIC.to_string(),
                MetricComparison {
                    current: current.success_rate,
                    baseline: baseline.success_rate,
                    change,
                    change_percent: percent_of(change, baseline.success_rate),
                    effect_size: 0.0,
                    significant: false,
                    regression: true,
                },
            );
        }

        let regressed: Vec<&str> = metrics
            .iter()
            .filter(|(_, m)| m.regression)
            .map(|(name, _)| name.as_str())
            .collect();

        Comparison {
            regression_detected: !regressed.is_empty(),
            message: (!regressed.is_empty())
                .then(|| format!("Regression detected in: {}", regressed.join(", "))),
            metrics,
            confidence_level: self.confidence_level,
        }
    }

    /// Compare the means of two summaries
    pub fn compare_metric(&self, current: &Summary, baseline: &Summary) -> MetricComparison {
        let change = current.mean - baseline.mean;
        let change_percent = percent_of(change, baseline.mean);

        let pooled = ((current.stddev.powi(2) + baseline.stddev.powi(2)) / 2.0).sqrt();
        let effect_size = if pooled > 0.0 {
            change.abs() / pooled
        } else {
            0.0
        };
        let significant = effect_size > self.effect_size_threshold;

        MetricComparison {
            current: current.mean,
            baseline: baseline.mean,
            change,
            change_percent,
            effect_size,
            significant,
            regression: change_percent > self.regression_threshold * 100.0 && significant,
        }
    }
}

fn percent_of(change: f64, base: f64) -> f64 {
    if base > 0.0 {
        change / base * 100.0
    } else {
        0.0
    }
}
