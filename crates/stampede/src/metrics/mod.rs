//! Real-time metrics pipeline
//!
//! This module provides:
//! - [`MetricsCollector`] - timers, counters, gauges and histograms with
//!   anomaly detection and rolling aggregations
//! - [`MetricStorage`] trait for flushed metrics, with
//!   [`InMemoryMetricStorage`] and [`TimeSeriesMetricStorage`]
//! - [`MetricsSnapshot`] with JSON, Prometheus and Graphite exporters
//!
//! # Flow
//!
//! ```text
//! record_timing / increment / gauge
//!          │
//!          ▼
//! ┌──────────────────────────────┐   every flush_interval   ┌───────────────┐
//! │ pending buffer + histograms  │ ───── swap & clear ─────►│ MetricStorage │
//! │ counters, gauges, aggregates │                          └───────────────┘
//! └──────────────────────────────┘
//!          │
//!          ▼
//!   snapshot() / export()
//! ```

mod collector;
mod export;
mod histogram;
mod memory;
mod storage;
mod timeseries;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use collector::{
    AnomalyCallback, FlusherHandle, MetricsCollector, MetricsError, ANOMALY_P99_REFRESH,
};
pub use export::{CounterValue, ExportFormat, GaugeValue, MetricsSnapshot};
pub use histogram::{HistogramSummary, MetricHistogram, MAX_RETAINED_VALUES, RETAINED_AFTER_TRUNCATE};
pub use memory::InMemoryMetricStorage;
pub use storage::{storage_from_config, Aggregation, MetricStorage, MetricStoreError};
pub use timeseries::TimeSeriesMetricStorage;

/// Metric tags. Ordered so that keys are stable regardless of insertion order.
pub type Tags = BTreeMap<String, String>;

/// Build a tag map from string pairs
pub fn tags<I, K, V>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Grouping key for a metric: `name:k1=v1&k2=v2`
pub fn metric_key(name: &str, tags: &Tags) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(tags.iter())
        .finish();
    format!("{name}:{query}")
}

/// Kind of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Timer,
    Counter,
    Gauge,
    Histogram,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Counter => write!(f, "counter"),
            Self::Gauge => write!(f, "gauge"),
            Self::Histogram => write!(f, "histogram"),
        }
    }
}

/// One emitted observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, metric_type: MetricType, value: f64, tags: Tags) -> Self {
        Self {
            name: name.into(),
            metric_type,
            value,
            tags,
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        metric_key(&self.name, &self.tags)
    }

    /// True when every pair in `filter` is present on this metric
    pub fn has_tags(&self, filter: &Tags) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|actual| actual == v))
    }
}

/// A timing far outside the observed distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    /// `(0, p99)` at the time of detection
    pub expected_range: (f64, f64),
    pub severity: AnomalySeverity,
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}
