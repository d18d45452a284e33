//! Metrics collector
//!
//! Buffers every metric in memory, keeps per-key histograms, counters and
//! gauges for live snapshots, and hands the buffer to a [`MetricStorage`] on
//! flush. Writers append under a single lock; flush swaps the buffer out
//! under the same lock and talks to storage without holding it.

use std::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::export::{CounterValue, ExportFormat, GaugeValue, MetricsSnapshot};
use super::histogram::{HistogramSummary, MetricHistogram};
use super::storage::{storage_from_config, Aggregation, MetricStorage, MetricStoreError};
use super::{metric_key, Anomaly, AnomalySeverity, Metric, MetricType, Tags};
use crate::config::{ConfigError, MetricsConfig};

/// Detected anomalies kept for [`MetricsCollector::anomalies`]
const MAX_ANOMALIES: usize = 1_000;

/// Records between p99 recomputations used by anomaly detection
pub const ANOMALY_P99_REFRESH: u64 = 100;

/// Errors from collector operations
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("timer not found: {0}")]
    TimerNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] MetricStoreError),

    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Hook invoked for every detected anomaly
pub type AnomalyCallback = Arc<dyn Fn(&Anomaly) + Send + Sync>;

#[derive(Default)]
struct CollectorState {
    /// Metrics waiting for the next flush
    pending: Vec<Metric>,
    counters: BTreeMap<String, CounterValue>,
    gauges: BTreeMap<String, GaugeValue>,
    histograms: HashMap<String, MetricHistogram>,
    /// Open and not yet persisted buckets, keyed by `Aggregation::key`
    aggregations: HashMap<String, Aggregation>,
    anomalies: Vec<Anomaly>,
    /// Last p99 per histogram key, with the count it was computed at
    anomaly_p99: HashMap<String, (f64, u64)>,
}

struct RunningTimer {
    name: String,
    tags: Tags,
    started: Instant,
}

/// Collects timers, counters, gauges and histograms
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use stampede::config::MetricsConfig;
/// use stampede::metrics::{tags, InMemoryMetricStorage, MetricsCollector};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let collector = MetricsCollector::new(
///     MetricsConfig::default(),
///     Arc::new(InMemoryMetricStorage::new()),
/// )?;
/// collector.record_timing("db.query", 12.5, tags([("table", "users")]));
/// collector.increment("jobs.done", 1, Default::default());
/// collector.flush().await?;
/// # Ok(())
/// # }
/// ```
pub struct MetricsCollector {
    config: MetricsConfig,
    storage: Arc<dyn MetricStorage>,
    state: Mutex<CollectorState>,
    timers: Mutex<HashMap<Uuid, RunningTimer>>,
    anomaly_callback: RwLock<Option<AnomalyCallback>>,
}

impl MetricsCollector {
    /// Create a collector over an explicit storage backend
    pub fn new(config: MetricsConfig, storage: Arc<dyn MetricStorage>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            storage,
            state: Mutex::new(CollectorState::default()),
            timers: Mutex::new(HashMap::new()),
            anomaly_callback: RwLock::new(None),
        })
    }

    /// Create a collector with the backend named in `config.storage_backend`
    pub fn from_config(config: MetricsConfig) -> Result<Self, ConfigError> {
        let storage = storage_from_config(&config);
        Self::new(config, storage)
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Register the anomaly hook, replacing any previous one
    pub fn on_anomaly<F>(&self, callback: F)
    where
        F: Fn(&Anomaly) + Send + Sync + 'static,
    {
        *self.anomaly_callback.write() = Some(Arc::new(callback));
    }

    /// Start a named timer; finish it with [`stop_timer`](Self::stop_timer)
    pub fn start_timer(&self, name: impl Into<String>, tags: Tags) -> Uuid {
        let id = Uuid::now_v7();
        self.timers.lock().insert(
            id,
            RunningTimer {
                name: name.into(),
                tags,
                started: Instant::now(),
            },
        );
        id
    }

    /// Stop a timer, record its elapsed milliseconds and return them
    pub fn stop_timer(&self, id: Uuid) -> Result<f64, MetricsError> {
        let timer = self
            .timers
            .lock()
            .remove(&id)
            .ok_or(MetricsError::TimerNotFound(id))?;
        let elapsed_ms = timer.started.elapsed().as_secs_f64() * 1000.0;
        self.record_timing(timer.name, elapsed_ms, timer.tags);
        Ok(elapsed_ms)
    }

    /// Time a fallible future
    ///
    /// The elapsed time is recorded whether the future succeeds or not. On
    /// failure `<name>.errors` is also incremented, tagged with the error type.
    pub async fn time<F, T, E>(&self, name: &str, tags: Tags, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record_timing(name, elapsed_ms, tags.clone());

        if result.is_err() {
            let mut error_tags = tags;
            error_tags.insert("error".to_string(), type_name::<E>().to_string());
            self.increment(format!("{name}.errors"), 1, error_tags);
        }
        result
    }

    /// Record a duration in milliseconds
    pub fn record_timing(&self, name: impl Into<String>, millis: f64, tags: Tags) {
        self.record(Metric::new(name, MetricType::Timer, millis, tags));
    }

    pub fn record_histogram(&self, name: impl Into<String>, value: f64, tags: Tags) {
        self.record(Metric::new(name, MetricType::Histogram, value, tags));
    }

    pub fn increment(&self, name: impl Into<String>, by: u64, tags: Tags) {
        self.record(Metric::new(name, MetricType::Counter, by as f64, tags));
    }

    pub fn gauge(&self, name: impl Into<String>, value: f64, tags: Tags) {
        self.record(Metric::new(name, MetricType::Gauge, value, tags));
    }

    fn record(&self, metric: Metric) {
        let key = metric.key();
        let anomaly = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let anomaly = if self.config.enable_realtime && metric.metric_type == MetricType::Timer {
                state.histograms.get(&key).and_then(|hist| {
                    self.check_anomaly(hist, &mut state.anomaly_p99, &key, &metric)
                })
            } else {
                None
            };

            match metric.metric_type {
                MetricType::Timer | MetricType::Histogram => {
                    state
                        .histograms
                        .entry(key.clone())
                        .or_insert_with(|| MetricHistogram::new(&metric.name, metric.tags.clone()))
                        .record(metric.value);
                }
                MetricType::Counter => {
                    let counter = state
                        .counters
                        .entry(key.clone())
                        .or_insert_with(|| CounterValue {
                            name: metric.name.clone(),
                            value: 0,
                            tags: metric.tags.clone(),
                        });
                    counter.value += metric.value as u64;
                }
                MetricType::Gauge => {
                    state.gauges.insert(
                        key.clone(),
                        GaugeValue {
                            name: metric.name.clone(),
                            value: metric.value,
                            tags: metric.tags.clone(),
                            timestamp: metric.timestamp,
                        },
                    );
                }
            }

            if self.config.enable_realtime {
                for interval in &self.config.aggregation_intervals {
                    let fresh = Aggregation::for_bucket(
                        &metric.name,
                        &metric.tags,
                        interval.as_secs(),
                        metric.timestamp,
                    );
                    state
                        .aggregations
                        .entry(fresh.key())
                        .or_insert(fresh)
                        .observe(metric.value);
                }
            }

            if let Some(anomaly) = &anomaly {
                if state.anomalies.len() >= MAX_ANOMALIES {
                    state.anomalies.remove(0);
                }
                state.anomalies.push(anomaly.clone());
            }

            state.pending.push(metric);
            anomaly
        };

        if let Some(anomaly) = anomaly {
            warn!(
                metric = %anomaly.metric,
                value = anomaly.value,
                p99 = anomaly.expected_range.1,
                severity = ?anomaly.severity,
                "Anomalous timing detected"
            );
            let callback = self.anomaly_callback.read().clone();
            if let Some(callback) = callback {
                callback(&anomaly);
            }
        }
    }

    fn check_anomaly(
        &self,
        hist: &MetricHistogram,
        p99_cache: &mut HashMap<String, (f64, u64)>,
        key: &str,
        metric: &Metric,
    ) -> Option<Anomaly> {
        let count = hist.count();
        if count <= self.config.anomaly_min_samples {
            return None;
        }
        // Sorting the retained values is too costly to repeat per record
        let p99 = match p99_cache.get(key) {
            Some(&(p99, at)) if count - at < ANOMALY_P99_REFRESH => p99,
            _ => {
                let p99 = hist.percentile(99.0);
                p99_cache.insert(key.to_string(), (p99, count));
                p99
            }
        };
        let threshold = p99 * self.config.anomaly_multiplier;
        if metric.value <= threshold {
            return None;
        }
        let severity = if metric.value > threshold * 2.0 {
            AnomalySeverity::Critical
        } else {
            AnomalySeverity::Warning
        };
        Some(Anomaly {
            metric: metric.name.clone(),
            value: metric.value,
            expected_range: (0.0, p99),
            severity,
            tags: metric.tags.clone(),
            timestamp: metric.timestamp,
        })
    }

    /// Histogram summary for one metric key, with the configured percentiles
    pub fn percentiles(&self, name: &str, tags: &Tags) -> Option<HistogramSummary> {
        self.state
            .lock()
            .histograms
            .get(&metric_key(name, tags))
            .map(|hist| hist.summary(&self.config.percentiles))
    }

    /// Anomalies detected so far, oldest first
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.state.lock().anomalies.clone()
    }

    /// Metrics buffered for the next flush
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Push buffered metrics and aggregations to storage
    ///
    /// Metrics go out in chunks of `batch_size`. If a chunk fails, it and
    /// every chunk after it are put back at the front of the buffer so the
    /// next flush retries them. Returns the number of metrics stored.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<usize, MetricsError> {
        let (mut metrics, aggregations) = {
            let mut state = self.state.lock();
            let metrics = std::mem::take(&mut state.pending);
            let aggregations: Vec<Aggregation> = state.aggregations.values().cloned().collect();
            (metrics, aggregations)
        };

        if metrics.is_empty() && aggregations.is_empty() {
            return Ok(0);
        }

        let mut stored = 0;
        while stored < metrics.len() {
            let end = (stored + self.config.batch_size).min(metrics.len());
            if let Err(e) = self.storage.store(&metrics[stored..end]).await {
                let unflushed: Vec<Metric> = metrics.drain(stored..).collect();
                error!(
                    error = %e,
                    requeued = unflushed.len(),
                    "Failed to flush metrics"
                );
                self.state.lock().pending.splice(0..0, unflushed);
                return Err(e.into());
            }
            stored = end;
        }

        if !aggregations.is_empty() {
            if let Err(e) = self.storage.store_aggregations(&aggregations).await {
                error!(error = %e, "Failed to flush aggregations");
                return Err(e.into());
            }
            // Closed buckets are final once persisted
            let now = Utc::now().timestamp();
            self.state
                .lock()
                .aggregations
                .retain(|_, agg| agg.bucket + agg.interval as i64 > now);
        }

        debug!(metrics = stored, aggregations = aggregations.len(), "Flushed metrics");
        Ok(stored)
    }

    /// Start the periodic background flush
    ///
    /// A zero `flush_interval` disables periodic flushing; the handle still
    /// performs a final flush on shutdown.
    pub fn start_flusher(self: &Arc<Self>) -> FlusherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let collector = Arc::clone(self);
        let interval = self.config.flush_interval;

        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Metrics flusher started");

            if interval.is_zero() {
                let _ = shutdown_rx.changed().await;
            } else {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // First tick completes immediately
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            // Errors are logged inside flush and retried next tick
                            let _ = collector.flush().await;
                        }
                        _ = shutdown_rx.changed() => {
                            debug!("Flush loop: shutdown requested");
                            break;
                        }
                    }
                }
            }

            if let Err(e) = collector.flush().await {
                error!(error = %e, "Final metrics flush failed");
            }
            info!("Metrics flusher stopped");
        });

        FlusherHandle { shutdown_tx, task }
    }

    /// Metrics from storage matching `name` and `tags` within `[start, end]`
    pub async fn query(
        &self,
        name: &str,
        tags: &Tags,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Metric>, MetricsError> {
        Ok(self.storage.query(name, tags, start, end).await?)
    }

    /// Current counters, gauges and histogram summaries
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            timestamp: Utc::now(),
            counters: state.counters.clone(),
            gauges: state.gauges.clone(),
            histograms: state
                .histograms
                .iter()
                .map(|(key, hist)| (key.clone(), hist.summary(&self.config.percentiles)))
                .collect(),
        }
    }

    /// Render the current snapshot
    pub fn export(&self, format: ExportFormat) -> Result<String, MetricsError> {
        let snapshot = self.snapshot();
        Ok(match format {
            ExportFormat::Json => snapshot.to_json()?,
            ExportFormat::Prometheus => snapshot.to_prometheus(&self.config.percentiles),
            ExportFormat::Graphite => snapshot.to_graphite(&self.config.percentiles),
        })
    }
}

/// Handle to the background flush task
pub struct FlusherHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FlusherHandle {
    /// Stop the loop and wait for the final flush
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Metrics flusher task failed");
        }
    }
}
