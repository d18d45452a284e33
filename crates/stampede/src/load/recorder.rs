//! Concurrency-safe result sink for a load run

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::scenario::HttpMethod;

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub step: String,
    pub method: HttpMethod,
    /// Interpolated URL that was sent
    pub url: String,
    /// 0 when the transport failed
    pub status_code: u16,
    /// Wall-clock milliseconds
    pub duration_ms: f64,
    pub bytes: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
}

/// Result of every validation rule on one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub details: Vec<ValidationDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetail {
    pub name: String,
    pub passed: bool,
    pub actual: Value,
    pub expected: String,
}

/// Run-level counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TestRunMetrics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_bytes: 0,
            started_at,
            ended_at: None,
        }
    }

    /// Seconds between start and end (or now, while running)
    pub fn elapsed_secs(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Progress hook invoked after each recorded result
pub type ProgressCallback = Arc<dyn Fn(&RequestResult) + Send + Sync>;

struct RecorderState {
    results: Vec<RequestResult>,
    metrics: TestRunMetrics,
}

/// Append-only result list plus counters, updated under one lock so that
/// `total == successful + failed` holds at every observation point
pub struct ResultRecorder {
    state: Mutex<RecorderState>,
    on_progress: RwLock<Option<ProgressCallback>>,
}

impl Default for ResultRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RecorderState {
                results: Vec::new(),
                metrics: TestRunMetrics::new(Utc::now()),
            }),
            on_progress: RwLock::new(None),
        }
    }

    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.on_progress.write() = callback;
    }

    /// Append a result and update the counters
    pub fn record(&self, result: RequestResult) {
        let callback = self.on_progress.read().clone();
        let notify = callback.as_ref().map(|_| result.clone());
        {
            let mut state = self.state.lock();
            state.metrics.total_requests += 1;
            if result.success {
                state.metrics.successful_requests += 1;
            } else {
                state.metrics.failed_requests += 1;
            }
            state.metrics.total_bytes += result.bytes;
            state.results.push(result);
        }
        // Outside the lock so the callback may read the recorder
        if let (Some(callback), Some(result)) = (callback, notify) {
            callback(&result);
        }
    }

    /// Point-in-time copy of the counters
    pub fn metrics(&self) -> TestRunMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stamp the end time and take everything recorded so far
    pub fn finish(&self) -> (Vec<RequestResult>, TestRunMetrics) {
        let mut state = self.state.lock();
        state.metrics.ended_at = Some(Utc::now());
        (std::mem::take(&mut state.results), state.metrics.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub(crate) fn result(step: &str, success: bool, duration_ms: f64, error: Option<&str>) -> RequestResult {
        RequestResult {
            step: step.to_string(),
            method: HttpMethod::Get,
            url: format!("http://test/{step}"),
            status_code: if error.is_some() { 0 } else { 200 },
            duration_ms,
            bytes: 10,
            timestamp: Utc::now(),
            success,
            error: error.map(str::to_string),
            validation: None,
        }
    }

    #[test]
    fn test_counters_track_results() {
        let recorder = ResultRecorder::new();
        recorder.record(result("a", true, 1.0, None));
        recorder.record(result("a", false, 2.0, Some("boom")));
        recorder.record(result("b", true, 3.0, None));

        let metrics = recorder.metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.total_bytes, 30);

        let (results, metrics) = recorder.finish();
        assert_eq!(results.len(), 3);
        assert!(metrics.ended_at.is_some());
    }

    #[test]
    fn test_progress_callback() {
        let recorder = ResultRecorder::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        recorder.set_progress_callback(Some(Arc::new(move |_| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        })));

        recorder.record(result("a", true, 1.0, None));
        recorder.record(result("a", true, 1.0, None));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let recorder = Arc::new(ResultRecorder::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let recorder = recorder.clone();
            tasks.spawn(async move {
                for i in 0..250 {
                    recorder.record(result("x", i % 5 != 0, 1.0, None));
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        let metrics = recorder.metrics();
        assert_eq!(recorder.len(), 2000);
        assert_eq!(metrics.total_requests, 2000);
        assert_eq!(
            metrics.total_requests,
            metrics.successful_requests + metrics.failed_requests
        );
    }
}
