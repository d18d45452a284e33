//! Bounded histogram for percentile estimation
//!
//! Keeps running count/sum/min/max over every update, plus a window of raw
//! values used for percentiles. The window is capped: once it grows past
//! [`MAX_RETAINED_VALUES`] it is cut down to the most recent
//! [`RETAINED_AFTER_TRUNCATE`] values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Tags;
use crate::stats;

/// Upper bound on raw values held per histogram
pub const MAX_RETAINED_VALUES: usize = 10_000;

/// Raw values kept after an overflow
pub const RETAINED_AFTER_TRUNCATE: usize = 5_000;

/// Histogram for one metric key
#[derive(Debug, Clone)]
pub struct MetricHistogram {
    name: String,
    tags: Tags,
    /// Most recent raw values (for percentile calculation)
    values: Vec<f64>,
    /// Total updates since creation
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl MetricHistogram {
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
            values: Vec::new(),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Record a value
    pub fn record(&mut self, value: f64) {
        self.values.push(value);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if self.values.len() > MAX_RETAINED_VALUES {
            let excess = self.values.len() - RETAINED_AFTER_TRUNCATE;
            self.values.drain(..excess);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Updates since creation, independent of how many raw values are retained
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of raw values currently held
    pub fn retained(&self) -> usize {
        self.values.len()
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Percentile (0-100) over the retained window
    pub fn percentile(&self, p: f64) -> f64 {
        stats::percentile(&stats::sorted_copy(&self.values), p)
    }

    /// Summary with the requested percentiles (0-100 scale)
    pub fn summary(&self, percentiles: &[f64]) -> HistogramSummary {
        let sorted = stats::sorted_copy(&self.values);
        let percentiles = percentiles
            .iter()
            .map(|p| (percentile_label(*p), stats::percentile(&sorted, *p)))
            .collect();

        HistogramSummary {
            name: self.name.clone(),
            tags: self.tags.clone(),
            count: self.count,
            sum: self.sum,
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            percentiles,
        }
    }
}

/// `50.0` -> `"p50"`, `99.9` -> `"p99.9"`
pub(crate) fn percentile_label(p: f64) -> String {
    format!("p{p}")
}

/// Point-in-time view of a histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Keyed by label, e.g. `p95`
    #[serde(flatten)]
    pub percentiles: BTreeMap<String, f64>,
}

impl HistogramSummary {
    pub fn percentile(&self, p: f64) -> f64 {
        self.percentiles
            .get(&percentile_label(p))
            .copied()
            .unwrap_or(0.0)
    }
}
