//! Benchmark regression detection
//!
//! ```text
//!  PerformanceTestSuite ─► RegressionTester ─► PerformanceTestHarness
//!                               │                 (warmup, samples, IQR)
//!                               ├─► StatisticsHistory
//!                               ├─► BaselineStore (file | memory)
//!                               └─► RegressionComparator ─► Comparison
//! ```
//!
//! Benchmarks inside a suite run one after another and each benchmark's
//! iterations run sequentially to keep measurement noise low.

mod baseline;
mod comparator;
mod harness;
mod history;
mod tester;

pub use baseline::{
    baseline_store_from_config, sanitize_name, Baseline, BaselineStore, BaselineStoreError,
    FileBaselineStore, InMemoryBaselineStore,
};
pub use comparator::{
    Comparison, MetricComparison, RegressionComparator, DURATION_METRIC, EFFECT_SIZE_THRESHOLD,
    MEMORY_METRIC, SUCCESS_RATE_DEGRADATION, SUCCESS_RATE_METRIC,
};
pub use harness::{
    Benchmark, BenchmarkError, BenchmarkRun, BenchmarkStatistics, FnBenchmark, MemoryProbe,
    PerformanceTestHarness, ProcessMemoryProbe, Sample, DEFAULT_ITERATIONS,
    DEFAULT_WARMUP_ITERATIONS,
};
pub use history::{HistoryRecord, StatisticsHistory, MAX_HISTORY_PER_TEST};
pub use tester::{
    PerformanceTestSuite, RegressionError, RegressionTestResults, RegressionTester, SuiteResults,
    TestOutcome,
};
