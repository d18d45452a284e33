//! Summaries over the results of a load run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::recorder::{RequestResult, TestRunMetrics};
use crate::stats::{self, Percentiles};

/// Error key for failures without a message
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Error key for responses that failed validation
pub const VALIDATION_FAILED: &str = "validation failed";

/// Run-level summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Fraction in `[0, 1]`
    pub success_rate: f64,
    pub duration_secs: f64,
    pub requests_per_second: f64,
    pub bytes_per_second: f64,
    pub average_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub percentiles: Percentiles,
}

/// Per-step breakdown; durations in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub count: u64,
    pub success: u64,
    pub failed: u64,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    /// Fraction in `[0, 1]`
    pub success_rate: f64,
}

/// Recorded results and counters of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    results: Vec<RequestResult>,
    metrics: TestRunMetrics,
}

impl TestResults {
    pub fn new(results: Vec<RequestResult>, metrics: TestRunMetrics) -> Self {
        Self { results, metrics }
    }

    pub fn results(&self) -> &[RequestResult] {
        &self.results
    }

    pub fn metrics(&self) -> &TestRunMetrics {
        &self.metrics
    }

    pub fn summary(&self) -> TestSummary {
        let m = &self.metrics;
        let duration_secs = m.elapsed_secs();
        let per_second = |n: u64| {
            if duration_secs > 0.0 {
                n as f64 / duration_secs
            } else {
                0.0
            }
        };

        let durations: Vec<f64> = self.results.iter().map(|r| r.duration_ms).collect();
        let sorted = stats::sorted_copy(&durations);

        TestSummary {
            total_requests: m.total_requests,
            successful_requests: m.successful_requests,
            failed_requests: m.failed_requests,
            success_rate: if m.total_requests > 0 {
                m.successful_requests as f64 / m.total_requests as f64
            } else {
                0.0
            },
            duration_secs,
            requests_per_second: per_second(m.total_requests),
            bytes_per_second: per_second(m.total_bytes),
            average_response_time: stats::mean(&sorted),
            min_response_time: sorted.first().copied().unwrap_or(0.0),
            max_response_time: sorted.last().copied().unwrap_or(0.0),
            percentiles: Percentiles::from_sorted(&sorted),
        }
    }

    /// Response-time percentile (0-100) over every result
    pub fn percentile(&self, p: f64) -> f64 {
        let durations: Vec<f64> = self.results.iter().map(|r| r.duration_ms).collect();
        stats::percentile(&stats::sorted_copy(&durations), p)
    }

    pub fn results_by_step(&self) -> BTreeMap<String, StepStats> {
        let mut by_step: BTreeMap<String, (StepStats, f64)> = BTreeMap::new();

        for result in &self.results {
            let (entry, total) = by_step.entry(result.step.clone()).or_insert_with(|| {
                (
                    StepStats {
                        count: 0,
                        success: 0,
                        failed: 0,
                        avg_duration: 0.0,
                        min_duration: f64::INFINITY,
                        max_duration: 0.0,
                        success_rate: 0.0,
                    },
                    0.0,
                )
            });
            entry.count += 1;
            if result.success {
                entry.success += 1;
            } else {
                entry.failed += 1;
            }
            *total += result.duration_ms;
            entry.min_duration = entry.min_duration.min(result.duration_ms);
            entry.max_duration = entry.max_duration.max(result.duration_ms);
        }

        by_step
            .into_iter()
            .map(|(step, (mut s, total))| {
                s.avg_duration = total / s.count as f64;
                s.success_rate = s.success as f64 / s.count as f64;
                (step, s)
            })
            .collect()
    }

    /// Failure message -> occurrences
    pub fn errors(&self) -> BTreeMap<String, u64> {
        let mut errors = BTreeMap::new();
        for result in self.results.iter().filter(|r| !r.success) {
            let key = match (&result.error, &result.validation) {
                (Some(error), _) => error.clone(),
                (None, Some(v)) if !v.passed => VALIDATION_FAILED.to_string(),
                _ => UNKNOWN_ERROR.to_string(),
            };
            *errors.entry(key).or_insert(0) += 1;
        }
        errors
    }
}
