//! MetricStorage trait definition

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{metric_key, InMemoryMetricStorage, Metric, Tags, TimeSeriesMetricStorage};
use crate::config::{MetricBackend, MetricsConfig};

/// Error type for metric storage operations
#[derive(Debug, thiserror::Error)]
pub enum MetricStoreError {
    /// Backend rejected or failed the operation
    #[error("metric backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Rolling count/sum/min/max for one metric key within one time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    /// Bucket width in seconds
    pub interval: u64,
    /// Bucket start, unix seconds
    pub bucket: i64,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Aggregation {
    /// Empty aggregation for the bucket containing `timestamp`
    pub fn for_bucket(name: &str, tags: &Tags, interval: u64, timestamp: DateTime<Utc>) -> Self {
        let width = interval.max(1) as i64;
        let bucket = timestamp.timestamp().div_euclid(width) * width;
        Self {
            name: name.to_string(),
            tags: tags.clone(),
            interval,
            bucket,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Storage key: `name:tags:interval:bucket`
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            metric_key(&self.name, &self.tags),
            self.interval,
            self.bucket
        )
    }

    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Backend that receives flushed metrics
///
/// Implementations must be safe to call from the background flusher while
/// queries run concurrently.
#[async_trait]
pub trait MetricStorage: Send + Sync {
    /// Persist one batch of metrics
    async fn store(&self, metrics: &[Metric]) -> Result<(), MetricStoreError>;

    /// Persist aggregations; an existing aggregation with the same key is replaced
    async fn store_aggregations(&self, aggregations: &[Aggregation])
        -> Result<(), MetricStoreError>;

    /// Metrics named `name`, carrying every tag in `tags`, with
    /// `start <= timestamp <= end`
    async fn query(
        &self,
        name: &str,
        tags: &Tags,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Metric>, MetricStoreError>;
}

/// Build the backend selected by `config.storage_backend`
pub fn storage_from_config(config: &MetricsConfig) -> Arc<dyn MetricStorage> {
    match config.storage_backend {
        MetricBackend::Memory => Arc::new(InMemoryMetricStorage::new()),
        MetricBackend::TimeSeries => Arc::new(TimeSeriesMetricStorage::new(config.retention_period)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_bucket_alignment() {
        let ts = Utc.timestamp_opt(1_700_000_123, 0).unwrap();
        let agg = Aggregation::for_bucket("req", &Tags::new(), 60, ts);
        assert_eq!(agg.bucket, 1_700_000_100);
        assert_eq!(agg.key(), "req::60:1700000100");
    }

    #[test]
    fn test_observe() {
        let ts = Utc::now();
        let mut a = Aggregation::for_bucket("req", &Tags::new(), 60, ts);
        a.observe(5.0);
        a.observe(1.0);
        a.observe(9.0);

        assert_eq!(a.count, 3);
        assert_eq!(a.sum, 15.0);
        assert_eq!(a.min, 1.0);
        assert_eq!(a.max, 9.0);
    }
}
