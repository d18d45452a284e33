// Load Testing & Performance Regression Engine
//
// This crate drives ramped, concurrent HTTP load against a service, measures
// benchmarks against stored baselines, and collects real-time metrics.
//
// Key design decisions:
// - HTTP goes through the Transport trait; ReqwestTransport is the default
// - Each virtual user is a tokio task with its own ExecutionContext
// - Results land in one mutex-guarded recorder; analysis is a pure function
// - Baseline and metric storage are traits selected by config enums
// - Collaborators are constructed explicitly and passed in, no globals
//
//   config ──► load::LoadTestRunner ──► load::TestResults
//         │            │
//         │            └──► metrics::MetricsCollector ──► MetricStorage
//         │                        │
//         │                        └──► export (json | prometheus | graphite)
//         └──► regression::RegressionTester ──► BaselineStore

pub mod config;
pub mod load;
pub mod metrics;
pub mod regression;
pub mod serde_duration;
pub mod stats;

pub use config::{
    BaselineBackend, ConfigError, LoadTestConfig, MetricBackend, MetricsConfig, RegressionConfig,
    StampedeConfig,
};

/// Commonly used types
pub mod prelude {
    pub use crate::config::{LoadTestConfig, MetricsConfig, RegressionConfig, StampedeConfig};
    pub use crate::load::{
        HttpMethod, LoadScenario, LoadTestRunner, LoadTestSuite, ReqwestTransport, TestResults,
        Transport, ValidationRule,
    };
    pub use crate::metrics::{ExportFormat, MetricsCollector};
    pub use crate::regression::{
        Benchmark, FnBenchmark, PerformanceTestSuite, RegressionTester,
    };
}
