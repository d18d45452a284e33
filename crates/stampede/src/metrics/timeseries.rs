//! Keyed time-series metric store
//!
//! Each metric key (`name` + tags) owns a series ordered by timestamp. Points
//! and aggregation buckets older than the retention period are dropped on
//! every write.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::storage::{Aggregation, MetricStorage, MetricStoreError};
use super::{Metric, Tags};

pub struct TimeSeriesMetricStorage {
    retention: chrono::Duration,
    series: RwLock<HashMap<String, Vec<Metric>>>,
    aggregations: RwLock<HashMap<String, Aggregation>>,
}

impl TimeSeriesMetricStorage {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            series: RwLock::new(HashMap::new()),
            aggregations: RwLock::new(HashMap::new()),
        }
    }

    /// Number of distinct metric keys
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Total points across all series
    pub fn point_count(&self) -> usize {
        self.series.read().values().map(Vec::len).sum()
    }

    pub fn aggregation_count(&self) -> usize {
        self.aggregations.read().len()
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now()
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn expire_series(&self, series: &mut HashMap<String, Vec<Metric>>) {
        let cutoff = self.cutoff();
        let mut expired = 0usize;
        series.retain(|_, points| {
            let keep_from = points.partition_point(|m| m.timestamp < cutoff);
            expired += keep_from;
            points.drain(..keep_from);
            !points.is_empty()
        });
        if expired > 0 {
            debug!(expired, "Expired metric points past retention");
        }
    }
}

#[async_trait]
impl MetricStorage for TimeSeriesMetricStorage {
    async fn store(&self, metrics: &[Metric]) -> Result<(), MetricStoreError> {
        let mut series = self.series.write();
        for metric in metrics {
            let points = series.entry(metric.key()).or_default();
            // Keep each series sorted; most inserts land at the end
            let pos = points.partition_point(|m| m.timestamp <= metric.timestamp);
            points.insert(pos, metric.clone());
        }
        self.expire_series(&mut series);
        Ok(())
    }

    async fn store_aggregations(
        &self,
        aggregations: &[Aggregation],
    ) -> Result<(), MetricStoreError> {
        let cutoff = self.cutoff().timestamp();
        let mut stored = self.aggregations.write();
        for agg in aggregations {
            stored.insert(agg.key(), agg.clone());
        }
        stored.retain(|_, agg| agg.bucket + agg.interval as i64 >= cutoff);
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        tags: &Tags,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Metric>, MetricStoreError> {
        let series = self.series.read();
        let mut results: Vec<Metric> = series
            .values()
            .filter(|points| {
                points
                    .first()
                    .is_some_and(|m| m.name == name && m.has_tags(tags))
            })
            .flat_map(|points| {
                let from = points.partition_point(|m| m.timestamp < start);
                let to = points.partition_point(|m| m.timestamp <= end);
                points[from..to.max(from)].iter().cloned()
            })
            .collect();
        results.sort_by_key(|m| m.timestamp);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{tags, MetricType};

    fn metric_at(name: &str, value: f64, tags: Tags, ts: DateTime<Utc>) -> Metric {
        Metric {
            name: name.to_string(),
            metric_type: MetricType::Gauge,
            value,
            tags,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_series_per_key() {
        let storage = TimeSeriesMetricStorage::new(Duration::from_secs(3600));
        let now = Utc::now();
        storage
            .store(&[
                metric_at("cpu", 1.0, tags([("host", "a")]), now),
                metric_at("cpu", 2.0, tags([("host", "b")]), now),
                metric_at("cpu", 3.0, tags([("host", "a")]), now),
            ])
            .await
            .unwrap();

        assert_eq!(storage.series_count(), 2);
        assert_eq!(storage.point_count(), 3);

        let host_a = storage
            .query(
                "cpu",
                &tags([("host", "a")]),
                now - chrono::Duration::seconds(1),
                now + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(host_a.len(), 2);
    }

    #[tokio::test]
    async fn test_query_range_is_inclusive_and_ordered() {
        let storage = TimeSeriesMetricStorage::new(Duration::from_secs(3600));
        let base = Utc::now() - chrono::Duration::minutes(10);
        let points: Vec<Metric> = (0..5)
            .rev()
            .map(|i| {
                metric_at(
                    "mem",
                    i as f64,
                    Tags::new(),
                    base + chrono::Duration::minutes(i),
                )
            })
            .collect();
        storage.store(&points).await.unwrap();

        let window = storage
            .query(
                "mem",
                &Tags::new(),
                base + chrono::Duration::minutes(1),
                base + chrono::Duration::minutes(3),
            )
            .await
            .unwrap();
        let values: Vec<f64> = window.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_retention_drops_old_points() {
        let storage = TimeSeriesMetricStorage::new(Duration::from_secs(60));
        let now = Utc::now();
        storage
            .store(&[
                metric_at("old", 1.0, Tags::new(), now - chrono::Duration::hours(2)),
                metric_at("fresh", 2.0, Tags::new(), now),
            ])
            .await
            .unwrap();

        assert_eq!(storage.series_count(), 1);
        assert_eq!(storage.point_count(), 1);
    }

    #[tokio::test]
    async fn test_retention_drops_old_aggregations() {
        let storage = TimeSeriesMetricStorage::new(Duration::from_secs(600));
        let now = Utc::now();
        let mut fresh = Aggregation::for_bucket("req", &Tags::new(), 60, now);
        fresh.observe(1.0);
        let mut stale =
            Aggregation::for_bucket("req", &Tags::new(), 60, now - chrono::Duration::hours(1));
        stale.observe(1.0);

        storage.store_aggregations(&[fresh, stale]).await.unwrap();
        assert_eq!(storage.aggregation_count(), 1);
    }
}
