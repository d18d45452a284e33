//! Suites of benchmarks checked against stored baselines

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::baseline::{baseline_store_from_config, Baseline, BaselineStore, BaselineStoreError};
use super::comparator::{Comparison, RegressionComparator};
use super::harness::{Benchmark, BenchmarkStatistics, MemoryProbe, PerformanceTestHarness, Sample};
use super::history::StatisticsHistory;
use crate::config::{ConfigError, RegressionConfig};
use crate::stats::{self, Summary};

/// Errors from regression runs and baseline maintenance
#[derive(Debug, thiserror::Error)]
pub enum RegressionError {
    #[error("test suite not found: {0}")]
    NotFound(String),

    #[error("insufficient history for {test}: need {required} records, have {available}")]
    InsufficientData {
        test: String,
        required: usize,
        available: usize,
    },

    #[error(transparent)]
    Store(#[from] BaselineStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Named group of benchmarks sharing setup and teardown hooks
pub struct PerformanceTestSuite {
    name: String,
    benchmarks: Vec<Arc<dyn Benchmark>>,
    setup: Vec<Hook>,
    teardown: Vec<Hook>,
}

impl PerformanceTestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            benchmarks: Vec::new(),
            setup: Vec::new(),
            teardown: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn benchmarks(&self) -> &[Arc<dyn Benchmark>] {
        &self.benchmarks
    }

    pub fn add_benchmark(&mut self, benchmark: impl Benchmark + 'static) -> &mut Self {
        self.benchmarks.push(Arc::new(benchmark));
        self
    }

    /// Runs once before the suite's benchmarks
    pub fn add_setup<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.setup.push(Box::new(hook));
        self
    }

    /// Runs once after the suite's benchmarks
    pub fn add_teardown<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.teardown.push(Box::new(hook));
        self
    }
}

/// Outcome of one benchmark in a regression run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test: String,
    pub samples: Vec<Sample>,
    pub outliers_removed: usize,
    pub statistics: BenchmarkStatistics,
    pub baseline: Option<Baseline>,
    pub comparison: Comparison,
    pub regression_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResults {
    pub suite: String,
    pub tests: Vec<TestOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegressionTestResults {
    pub suites: Vec<SuiteResults>,
}

impl RegressionTestResults {
    pub fn has_regressions(&self) -> bool {
        self.tests().any(|t| t.regression_detected)
    }

    pub fn regressions(&self) -> Vec<&TestOutcome> {
        self.tests().filter(|t| t.regression_detected).collect()
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestOutcome> {
        self.suites.iter().flat_map(|s| s.tests.iter())
    }

    /// Plain-text report
    pub fn report(&self) -> String {
        let mut out = String::from("Performance Regression Test Report\n");
        out.push_str("==================================\n\n");

        for suite in &self.suites {
            let title = format!("Suite: {}", suite.suite);
            let _ = writeln!(out, "{title}\n{}", "-".repeat(title.chars().count()));

            for test in &suite.tests {
                if test.regression_detected {
                    let _ = writeln!(out, "  ✗ REGRESSION {}", test.test);
                    for (metric, cmp) in test.comparison.metrics.iter().filter(|(_, c)| c.regression) {
                        let _ = writeln!(
                            out,
                            "    - {metric}: {:.2} → {:.2} ({:.1}% worse)",
                            cmp.baseline,
                            cmp.current,
                            cmp.change_percent.abs()
                        );
                    }
                } else {
                    let _ = writeln!(out, "  ✓ PASS {}", test.test);
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Runs registered suites, compares against baselines and keeps history
pub struct RegressionTester {
    config: RegressionConfig,
    suites: Vec<PerformanceTestSuite>,
    harness: PerformanceTestHarness,
    comparator: RegressionComparator,
    store: Arc<dyn BaselineStore>,
    history: StatisticsHistory,
    version: String,
}

impl RegressionTester {
    pub fn new(config: RegressionConfig) -> Result<Self, RegressionError> {
        config.validate()?;
        Ok(Self {
            harness: PerformanceTestHarness::new(&config),
            comparator: RegressionComparator::new(&config),
            store: baseline_store_from_config(&config),
            suites: Vec::new(),
            history: StatisticsHistory::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn BaselineStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.harness = self.harness.with_memory_probe(probe);
        self
    }

    pub fn with_comparator(mut self, comparator: RegressionComparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Application version stamped into saved baselines
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replaces any suite with the same name
    pub fn register_suite(&mut self, suite: PerformanceTestSuite) -> &mut Self {
        self.suites.retain(|s| s.name != suite.name);
        self.suites.push(suite);
        self
    }

    pub fn suite_names(&self) -> Vec<&str> {
        self.suites.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.config
    }

    pub fn history(&self) -> &StatisticsHistory {
        &self.history
    }

    pub fn store(&self) -> &Arc<dyn BaselineStore> {
        &self.store
    }

    /// Run the named suites in registration order; all of them when `names` is empty
    #[instrument(skip(self))]
    pub async fn run_tests(&self, names: &[&str]) -> Result<RegressionTestResults, RegressionError> {
        if let Some(missing) = names
            .iter()
            .find(|n| !self.suites.iter().any(|s| s.name == **n))
        {
            return Err(RegressionError::NotFound(missing.to_string()));
        }

        let mut results = RegressionTestResults::default();
        for suite in self
            .suites
            .iter()
            .filter(|s| names.is_empty() || names.contains(&s.name.as_str()))
        {
            info!(suite = %suite.name, benchmarks = suite.benchmarks.len(), "Running suite");
            for hook in &suite.setup {
                hook();
            }

            let mut tests = Vec::with_capacity(suite.benchmarks.len());
            let mut failure = None;
            for bench in &suite.benchmarks {
                match self.run_benchmark(bench.as_ref()).await {
                    Ok(outcome) => tests.push(outcome),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            // Teardown runs even when a benchmark aborted the suite
            for hook in &suite.teardown {
                hook();
            }
            if let Some(e) = failure {
                error!(suite = %suite.name, error = %e, "Suite aborted");
                return Err(e);
            }
            results.suites.push(SuiteResults {
                suite: suite.name.clone(),
                tests,
            });
        }
        Ok(results)
    }

    /// Measure one benchmark and compare it with its stored baseline
    pub async fn run_benchmark(&self, bench: &dyn Benchmark) -> Result<TestOutcome, RegressionError> {
        let test = bench.name().to_string();
        let run = self.harness.run(bench).await;
        self.history.record(&test, run.statistics.clone());

        let baseline = self.store.get(&test).await?;
        let comparison = self
            .comparator
            .compare(&run.statistics, baseline.as_ref().map(|b| &b.statistics));

        if comparison.regression_detected {
            warn!(
                test = %test,
                message = comparison.message.as_deref().unwrap_or_default(),
                "Performance regression"
            );
        } else if self.config.auto_baseline_update {
            self.update_baseline(&test, Some(run.statistics.clone())).await?;
        }

        Ok(TestOutcome {
            test,
            samples: run.samples,
            outliers_removed: run.outliers_removed,
            statistics: run.statistics,
            baseline,
            regression_detected: comparison.regression_detected,
            comparison,
        })
    }

    /// Save `statistics` as the new baseline, or rebuild it from recent history
    pub async fn update_baseline(
        &self,
        test: &str,
        statistics: Option<BenchmarkStatistics>,
    ) -> Result<Baseline, RegressionError> {
        let statistics = match statistics {
            Some(statistics) => statistics,
            None => self.statistics_from_history(test)?,
        };

        let baseline = Baseline {
            statistics,
            updated_at: Utc::now().timestamp(),
            version: self.version.clone(),
        };
        self.store.save(test, &baseline).await?;
        info!(test, mean_ms = baseline.statistics.duration.mean, "Baseline updated");
        Ok(baseline)
    }

    fn statistics_from_history(&self, test: &str) -> Result<BenchmarkStatistics, RegressionError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.baseline_window));
        let records = self.history.since(test, cutoff);
        let required = self.config.min_samples.max(1);
        if records.len() < required {
            return Err(RegressionError::InsufficientData {
                test: test.to_string(),
                required,
                available: records.len(),
            });
        }

        let durations: Vec<f64> = records.iter().map(|r| r.statistics.duration.mean).collect();
        let memory: Vec<f64> = records.iter().map(|r| r.statistics.memory.mean).collect();
        let success: Vec<f64> = records.iter().map(|r| r.statistics.success_rate).collect();

        Ok(BenchmarkStatistics {
            duration: Summary::from_values(&durations),
            memory: Summary::from_values(&memory),
            success_rate: stats::mean(&success),
            sample_count: records.len(),
            timestamp: Utc::now().timestamp(),
        })
    }

    /// Stored baselines keyed by file-safe test name
    pub async fn baselines(&self) -> Result<BTreeMap<String, Baseline>, RegressionError> {
        Ok(self.store.list_all().await?)
    }
}
