//! In-memory implementation of MetricStorage for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::storage::{Aggregation, MetricStorage, MetricStoreError};
use super::{Metric, Tags};

/// Flat in-memory metric store
///
/// Keeps every stored metric until [`clear`](Self::clear) is called.
///
/// # Example
///
/// ```
/// use stampede::metrics::InMemoryMetricStorage;
///
/// let storage = InMemoryMetricStorage::new();
/// assert_eq!(storage.metric_count(), 0);
/// ```
pub struct InMemoryMetricStorage {
    metrics: RwLock<Vec<Metric>>,
    aggregations: RwLock<HashMap<String, Aggregation>>,
}

impl InMemoryMetricStorage {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(Vec::new()),
            aggregations: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of stored metrics
    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Get the number of stored aggregations
    pub fn aggregation_count(&self) -> usize {
        self.aggregations.read().len()
    }

    /// Copy of every stored metric, in insertion order
    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.read().clone()
    }

    pub fn aggregation(&self, key: &str) -> Option<Aggregation> {
        self.aggregations.read().get(key).cloned()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.metrics.write().clear();
        self.aggregations.write().clear();
    }
}

impl Default for InMemoryMetricStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricStorage for InMemoryMetricStorage {
    async fn store(&self, metrics: &[Metric]) -> Result<(), MetricStoreError> {
        self.metrics.write().extend_from_slice(metrics);
        Ok(())
    }

    async fn store_aggregations(
        &self,
        aggregations: &[Aggregation],
    ) -> Result<(), MetricStoreError> {
        let mut stored = self.aggregations.write();
        for agg in aggregations {
            stored.insert(agg.key(), agg.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        tags: &Tags,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Metric>, MetricStoreError> {
        Ok(self
            .metrics
            .read()
            .iter()
            .filter(|m| {
                m.name == name && m.timestamp >= start && m.timestamp <= end && m.has_tags(tags)
            })
            .cloned()
            .collect())
    }
}
