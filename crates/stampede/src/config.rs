//! Typed configuration for load runs, regression checks and metrics
//!
//! Every struct has documented defaults, `with_*` builders and a
//! `validate()` that is called by the component constructors, so a bad
//! configuration fails before any run starts.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serde_duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Storage backend name not recognised
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Where baselines are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum BaselineBackend {
    /// One JSON document per test under `baseline_directory`
    File,
    /// Process-local map, lost on exit
    Memory,
}

impl FromStr for BaselineBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl TryFrom<String> for BaselineBackend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where flushed metrics are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum MetricBackend {
    /// Flat append-only list
    Memory,
    /// Per-key time-ordered series with retention
    TimeSeries,
}

impl FromStr for MetricBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "time_series" | "timeseries" => Ok(Self::TimeSeries),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl TryFrom<String> for MetricBackend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Load run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Prefix for step URLs that start with `/`
    pub base_url: String,

    /// Per-request timeout
    #[serde(with = "serde_duration::secs")]
    pub timeout: Duration,

    /// Number of virtual users at full ramp
    pub concurrent_users: usize,

    /// Total run duration
    #[serde(with = "serde_duration::secs")]
    pub duration: Duration,

    /// Time to go from zero to `concurrent_users`
    #[serde(with = "serde_duration::secs")]
    pub ramp_up_time: Duration,

    /// Pause after each step
    #[serde(with = "serde_duration::secs")]
    pub think_time: Duration,

    /// User-Agent header sent by the HTTP transport
    pub user_agent: String,

    pub follow_redirects: bool,

    pub verify_ssl: bool,

    /// How often the runner re-evaluates the ramp target
    #[serde(with = "serde_duration::millis")]
    pub ramp_tick: Duration,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            timeout: Duration::from_secs(30),
            concurrent_users: 10,
            duration: Duration::from_secs(60),
            ramp_up_time: Duration::from_secs(10),
            think_time: Duration::from_secs(1),
            user_agent: format!("stampede/{}", env!("CARGO_PKG_VERSION")),
            follow_redirects: true,
            verify_ssl: false,
            ramp_tick: Duration::from_millis(10),
        }
    }
}

impl LoadTestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrent_users(mut self, users: usize) -> Self {
        self.concurrent_users = users;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_ramp_up_time(mut self, ramp_up: Duration) -> Self {
        self.ramp_up_time = ramp_up;
        self
    }

    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrent_users == 0 {
            return Err(ConfigError::invalid("concurrent_users", "must be at least 1"));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::invalid("duration", "must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }
        if self.ramp_tick.is_zero() {
            return Err(ConfigError::invalid("ramp_tick", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Regression check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// History window, in days, used when rebuilding a baseline from history
    pub baseline_window: u32,

    /// Relative degradation that counts as a regression (0.1 = 10%)
    pub regression_threshold: f64,

    /// Reported alongside comparisons
    pub confidence_level: f64,

    /// Minimum history records needed to rebuild a baseline
    pub min_samples: usize,

    /// Drop samples outside the IQR fences before computing statistics
    pub outlier_detection: bool,

    /// Overwrite the baseline with every run's statistics
    pub auto_baseline_update: bool,

    pub storage_backend: BaselineBackend,

    /// Directory for the file backend
    pub baseline_directory: PathBuf,

    /// Pause between measured iterations
    #[serde(with = "serde_duration::millis")]
    pub iteration_delay: Duration,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            baseline_window: 7,
            regression_threshold: 0.1,
            confidence_level: 0.95,
            min_samples: 30,
            outlier_detection: true,
            auto_baseline_update: false,
            storage_backend: BaselineBackend::File,
            baseline_directory: PathBuf::from("/tmp/performance_baselines"),
            iteration_delay: Duration::from_millis(10),
        }
    }
}

impl RegressionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regression_threshold(mut self, threshold: f64) -> Self {
        self.regression_threshold = threshold;
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn with_baseline_window(mut self, days: u32) -> Self {
        self.baseline_window = days;
        self
    }

    pub fn with_outlier_detection(mut self, enabled: bool) -> Self {
        self.outlier_detection = enabled;
        self
    }

    pub fn with_auto_baseline_update(mut self, enabled: bool) -> Self {
        self.auto_baseline_update = enabled;
        self
    }

    pub fn with_storage_backend(mut self, backend: BaselineBackend) -> Self {
        self.storage_backend = backend;
        self
    }

    pub fn with_baseline_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_directory = dir.into();
        self
    }

    pub fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    /// Window expressed as a `Duration`
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.baseline_window) * 86_400)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.regression_threshold >= 0.0 && self.regression_threshold.is_finite()) {
            return Err(ConfigError::invalid(
                "regression_threshold",
                "must be a non-negative number",
            ));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ConfigError::invalid(
                "confidence_level",
                "must be between 0 and 1 (exclusive)",
            ));
        }
        if self.baseline_window == 0 {
            return Err(ConfigError::invalid("baseline_window", "must be at least 1 day"));
        }
        Ok(())
    }
}

/// Metrics pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub storage_backend: MetricBackend,

    /// How long flushed metrics are kept by the time-series backend
    #[serde(with = "serde_duration::secs")]
    pub retention_period: Duration,

    /// Bucket widths for rolling aggregations
    #[serde(with = "serde_duration::secs_vec")]
    pub aggregation_intervals: Vec<Duration>,

    /// Percentiles (0-100 scale) reported for histograms
    pub percentiles: Vec<f64>,

    /// Run anomaly detection and aggregation on every metric
    pub enable_realtime: bool,

    /// Maximum metrics per storage call
    pub batch_size: usize,

    /// Background flush period; zero disables the flusher
    #[serde(with = "serde_duration::secs")]
    pub flush_interval: Duration,

    /// Histogram size before anomaly detection kicks in
    pub anomaly_min_samples: u64,

    /// A timing above `p99 * anomaly_multiplier` is flagged
    pub anomaly_multiplier: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            storage_backend: MetricBackend::Memory,
            retention_period: Duration::from_secs(86_400),
            aggregation_intervals: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(3600),
            ],
            percentiles: vec![50.0, 75.0, 90.0, 95.0, 99.0],
            enable_realtime: true,
            batch_size: 1000,
            flush_interval: Duration::from_secs(10),
            anomaly_min_samples: 100,
            anomaly_multiplier: 2.0,
        }
    }
}

impl MetricsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_backend(mut self, backend: MetricBackend) -> Self {
        self.storage_backend = backend;
        self
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.enable_realtime = enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_retention_period(mut self, retention: Duration) -> Self {
        self.retention_period = retention;
        self
    }

    pub fn with_aggregation_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.aggregation_intervals = intervals;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(**p > 0.0 && **p <= 100.0))
        {
            return Err(ConfigError::invalid(
                "percentiles",
                format!("{p} is outside (0, 100]"),
            ));
        }
        // Buckets are aligned to whole unix seconds
        if let Some(d) = self
            .aggregation_intervals
            .iter()
            .find(|d| d.as_secs() == 0 || d.subsec_nanos() != 0)
        {
            return Err(ConfigError::invalid(
                "aggregation_intervals",
                format!("{}s is not a whole number of seconds >= 1", d.as_secs_f64()),
            ));
        }
        if self.retention_period.is_zero() {
            return Err(ConfigError::invalid(
                "retention_period",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampedeConfig {
    pub load: LoadTestConfig,
    pub regression: RegressionConfig,
    pub metrics: MetricsConfig,
}

impl StampedeConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.load.validate()?;
        self.regression.validate()?;
        self.metrics.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        StampedeConfig::default().validate().unwrap();
        let load = LoadTestConfig::default();
        assert_eq!(load.concurrent_users, 10);
        assert_eq!(load.duration, Duration::from_secs(60));
        assert_eq!(load.ramp_up_time, Duration::from_secs(10));
        assert_eq!(RegressionConfig::default().min_samples, 30);
        assert_eq!(MetricsConfig::default().batch_size, 1000);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(matches!(
            "redis".parse::<BaselineBackend>(),
            Err(ConfigError::UnknownBackend(name)) if name == "redis"
        ));
        assert!(matches!(
            "influxdb".parse::<MetricBackend>(),
            Err(ConfigError::UnknownBackend(_))
        ));
        assert_eq!(
            "TimeSeries".parse::<MetricBackend>().unwrap(),
            MetricBackend::TimeSeries
        );
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
load:
  concurrent_users: 25
  duration: 30
  think_time: 0.5
regression:
  storage_backend: memory
  regression_threshold: 0.2
metrics:
  storage_backend: time_series
  percentiles: [50, 99]
"#;
        let config = StampedeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.load.concurrent_users, 25);
        assert_eq!(config.load.duration, Duration::from_secs(30));
        assert_eq!(config.load.think_time, Duration::from_millis(500));
        assert_eq!(config.load.ramp_up_time, Duration::from_secs(10));
        assert_eq!(config.regression.storage_backend, BaselineBackend::Memory);
        assert_eq!(config.metrics.storage_backend, MetricBackend::TimeSeries);
        assert_eq!(config.metrics.percentiles, vec![50.0, 99.0]);
    }

    #[test]
    fn test_yaml_unknown_backend_fails() {
        let yaml = "regression:\n  storage_backend: redis\n";
        assert!(StampedeConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let load = LoadTestConfig::default().with_concurrent_users(0);
        assert!(matches!(
            load.validate(),
            Err(ConfigError::Invalid { field: "concurrent_users", .. })
        ));

        let metrics = MetricsConfig::default().with_percentiles(vec![50.0, 150.0]);
        assert!(metrics.validate().is_err());

        for interval in [Duration::ZERO, Duration::from_millis(500), Duration::from_millis(1500)] {
            let metrics = MetricsConfig::default().with_aggregation_intervals(vec![interval]);
            assert!(matches!(
                metrics.validate(),
                Err(ConfigError::Invalid { field: "aggregation_intervals", .. })
            ));
        }
        let metrics = MetricsConfig::default().with_aggregation_intervals(vec![Duration::from_secs(1)]);
        assert!(metrics.validate().is_ok());

        let regression = RegressionConfig {
            confidence_level: 1.5,
            ..Default::default()
        };
        assert!(regression.validate().is_err());
    }
}
