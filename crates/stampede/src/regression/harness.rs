//! Benchmark harness
//!
//! Runs one benchmark sequentially: warmup iterations (discarded), then
//! measured iterations separated by a short delay. Each measured iteration
//! yields a [`Sample`]; failures and panics become failed samples.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::RegressionConfig;
use crate::stats::{self, Summary};

/// Default measured iterations per benchmark
pub const DEFAULT_ITERATIONS: usize = 100;

/// Default warmup iterations per benchmark
pub const DEFAULT_WARMUP_ITERATIONS: usize = 10;

/// Failure reported by a benchmark body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BenchmarkError(pub String);

impl BenchmarkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A named unit of work measured by the harness
#[async_trait]
pub trait Benchmark: Send + Sync {
    fn name(&self) -> &str;

    fn iterations(&self) -> usize {
        DEFAULT_ITERATIONS
    }

    fn warmup_iterations(&self) -> usize {
        DEFAULT_WARMUP_ITERATIONS
    }

    async fn run(&self) -> Result<(), BenchmarkError>;
}

/// Benchmark backed by an async closure
///
/// ```
/// use stampede::regression::FnBenchmark;
///
/// let bench = FnBenchmark::new("parse", || async { Ok(()) }).with_iterations(20);
/// ```
pub struct FnBenchmark<F> {
    name: String,
    iterations: usize,
    warmup_iterations: usize,
    body: F,
}

impl<F, Fut> FnBenchmark<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BenchmarkError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            iterations: DEFAULT_ITERATIONS,
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            body,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_warmup(mut self, warmup_iterations: usize) -> Self {
        self.warmup_iterations = warmup_iterations;
        self
    }
}

#[async_trait]
impl<F, Fut> Benchmark for FnBenchmark<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BenchmarkError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn warmup_iterations(&self) -> usize {
        self.warmup_iterations
    }

    async fn run(&self) -> Result<(), BenchmarkError> {
        (self.body)().await
    }
}

/// One measured iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub duration_ms: f64,
    /// Resident memory change in bytes; may be negative
    pub memory_delta: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Source of the memory figure sampled around each iteration
pub trait MemoryProbe: Send + Sync {
    fn current_bytes(&self) -> u64;
}

/// Resident set size of the current process
pub struct ProcessMemoryProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()),
        );
        Self {
            pid,
            system: Mutex::new(system),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Statistics derived from one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStatistics {
    /// Milliseconds
    pub duration: Summary,
    /// Bytes
    pub memory: Summary,
    /// Fraction of successful samples
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub sample_count: usize,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

impl BenchmarkStatistics {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let durations: Vec<f64> = samples.iter().map(|s| s.duration_ms).collect();
        let memory: Vec<f64> = samples.iter().map(|s| s.memory_delta).collect();
        let successes = samples.iter().filter(|s| s.success).count();

        Self {
            duration: Summary::from_values(&durations),
            memory: Summary::from_values(&memory),
            success_rate: if samples.is_empty() {
                0.0
            } else {
                successes as f64 / samples.len() as f64
            },
            sample_count: samples.len(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Output of [`PerformanceTestHarness::run`]
#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    /// Samples that survived outlier filtering
    pub samples: Vec<Sample>,
    pub outliers_removed: usize,
    pub statistics: BenchmarkStatistics,
}

pub struct PerformanceTestHarness {
    outlier_detection: bool,
    iteration_delay: Duration,
    probe: Arc<dyn MemoryProbe>,
}

impl PerformanceTestHarness {
    pub fn new(config: &RegressionConfig) -> Self {
        Self {
            outlier_detection: config.outlier_detection,
            iteration_delay: config.iteration_delay,
            probe: Arc::new(ProcessMemoryProbe::new()),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[instrument(skip(self, bench), fields(benchmark = %bench.name()))]
    pub async fn run(&self, bench: &dyn Benchmark) -> BenchmarkRun {
        for _ in 0..bench.warmup_iterations() {
            let _ = guarded(bench).await;
        }

        let iterations = bench.iterations();
        let mut samples = Vec::with_capacity(iterations);
        for i in 0..iterations {
            let memory_before = self.probe.current_bytes();
            let started = Instant::now();
            let outcome = guarded(bench).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            samples.push(match outcome {
                Ok(()) => Sample {
                    duration_ms,
                    memory_delta: self.probe.current_bytes() as f64 - memory_before as f64,
                    timestamp: Utc::now(),
                    success: true,
                    error: None,
                },
                Err(e) => Sample {
                    duration_ms,
                    memory_delta: 0.0,
                    timestamp: Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                },
            });

            if i + 1 < iterations && !self.iteration_delay.is_zero() {
                tokio::time::sleep(self.iteration_delay).await;
            }
        }

        let measured = samples.len();
        if self.outlier_detection {
            samples = stats::remove_outliers(samples, |s| s.duration_ms);
        }
        let outliers_removed = measured - samples.len();
        let statistics = BenchmarkStatistics::from_samples(&samples);

        debug!(
            samples = samples.len(),
            outliers_removed,
            mean_ms = statistics.duration.mean,
            success_rate = statistics.success_rate,
            "Benchmark measured"
        );

        BenchmarkRun {
            samples,
            outliers_removed,
            statistics,
        }
    }
}

/// Run once, turning a panic into an error
async fn guarded(bench: &dyn Benchmark) -> Result<(), BenchmarkError> {
    match AssertUnwindSafe(bench.run()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "benchmark panicked".to_string());
            Err(BenchmarkError(format!("panic: {message}")))
        }
    }
}
