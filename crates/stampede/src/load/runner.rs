//! Load test orchestration
//!
//! ```text
//!  users
//!    ▲                    ┌──────────────────────────────┐
//!  N │              ┌─────┘                              │
//!    │          ┌───┘                                    │
//!    │      ┌───┘                                        │
//!    │  ┌───┘                                            │
//!  0 └──┴──────────────┬───────────────────────────────── ┴──► t
//!       0          ramp_up_time                       duration
//! ```
//!
//! The runner polls [`RampSchedule::target_users`] every `ramp_tick` and
//! launches virtual users until the target is met. Users are never stopped
//! early; at `duration` they finish their current iteration and exit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::analyzer::TestResults;
use super::executor::StepExecutor;
use super::recorder::{ProgressCallback, RequestResult, ResultRecorder};
use super::scenario::{HttpMethod, LoadScenario, Step};
use super::simulator::VirtualUserSimulator;
use super::transport::Transport;
use crate::config::{ConfigError, LoadTestConfig};
use crate::metrics::MetricsCollector;

/// Errors from load test orchestration
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("scenario `{0}` has no steps")]
    EmptyScenario(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Target concurrency over time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSchedule {
    users: usize,
    ramp_up: Duration,
}

impl RampSchedule {
    pub fn new(users: usize, ramp_up: Duration) -> Self {
        Self { users, ramp_up }
    }

    /// `min(users, ceil(elapsed / (ramp_up / users)))`; everyone at once when
    /// `ramp_up` is zero
    pub fn target_users(&self, elapsed: Duration) -> usize {
        if self.users == 0 {
            return 0;
        }
        if self.ramp_up.is_zero() {
            return self.users;
        }
        let interval = self.ramp_up.as_secs_f64() / self.users as f64;
        let target = (elapsed.as_secs_f64() / interval).ceil() as usize;
        target.min(self.users)
    }
}

/// Counts one running virtual user; released on drop, including when the
/// user's task panics
struct ActiveUser(Arc<AtomicUsize>);

impl ActiveUser {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveUser {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs one scenario with ramp-up against a transport
pub struct LoadTestRunner {
    config: LoadTestConfig,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<MetricsCollector>>,
    progress: Option<ProgressCallback>,
    active_users: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl LoadTestRunner {
    pub fn new(config: LoadTestConfig, transport: Arc<dyn Transport>) -> Result<Self, LoadTestError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            metrics: None,
            progress: None,
            active_users: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        })
    }

    /// Feed per-request timings and error counts into a collector
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    /// Invoke `callback` after each recorded result
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RequestResult) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub(crate) fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Virtual users currently running
    pub fn active_users(&self) -> usize {
        self.active_users.load(Ordering::Acquire)
    }

    /// Abort the run: no new users, in-flight requests dropped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[instrument(skip(self, scenario), fields(scenario = %scenario.name()))]
    pub async fn run(&self, scenario: &LoadScenario) -> Result<TestResults, LoadTestError> {
        if scenario.is_empty() {
            return Err(LoadTestError::EmptyScenario(scenario.name().to_string()));
        }

        let scenario = Arc::new(scenario.clone());
        let recorder = Arc::new(ResultRecorder::new());
        recorder.set_progress_callback(self.progress.clone());
        let executor = Arc::new(
            StepExecutor::new(self.transport.clone(), recorder.clone())
                .with_metrics(self.metrics.clone())
                .with_scenario_name(scenario.name()),
        );

        let users = self.config.concurrent_users;
        let schedule = RampSchedule::new(users, self.config.ramp_up_time);
        let start = Instant::now();
        let deadline = start + self.config.duration;

        info!(
            users,
            duration_secs = self.config.duration.as_secs_f64(),
            ramp_up_secs = self.config.ramp_up_time.as_secs_f64(),
            steps = scenario.steps().len(),
            "Starting load test"
        );

        let mut tasks = JoinSet::new();
        let mut launched = 0usize;
        let mut ticker = tokio::time::interval(self.config.ramp_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while Instant::now() < deadline && !self.cancel.is_cancelled() {
            let target = schedule.target_users(start.elapsed());
            while launched < target {
                let simulator = VirtualUserSimulator::new(
                    launched,
                    scenario.clone(),
                    executor.clone(),
                    self.config.think_time,
                )
                .with_cancellation(self.cancel.child_token());
                let active = ActiveUser::enter(&self.active_users);
                tasks.spawn(async move {
                    let _active = active;
                    simulator.run(deadline).await
                });
                launched += 1;
            }

            if launched >= users {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        let mut iterations = 0u64;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(n) => iterations += n,
                Err(e) => warn!(error = %e, "Virtual user task failed"),
            }
        }

        let (results, metrics) = recorder.finish();
        let results = TestResults::new(results, metrics);
        let summary = results.summary();
        info!(
            launched,
            iterations,
            total_requests = summary.total_requests,
            failed_requests = summary.failed_requests,
            requests_per_second = summary.requests_per_second,
            "Load test complete"
        );
        Ok(results)
    }
}

/// Registry of named scenarios sharing one transport and configuration
pub struct LoadTestSuite {
    config: LoadTestConfig,
    transport: Arc<dyn Transport>,
    scenarios: BTreeMap<String, LoadScenario>,
    metrics: Option<Arc<MetricsCollector>>,
    progress: Option<ProgressCallback>,
}

impl LoadTestSuite {
    pub fn new(config: LoadTestConfig, transport: Arc<dyn Transport>) -> Result<Self, LoadTestError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            scenarios: BTreeMap::new(),
            metrics: None,
            progress: None,
        })
    }

    /// Define (or replace) a scenario
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use stampede::config::LoadTestConfig;
    /// # use stampede::load::{LoadTestSuite, ReqwestTransport};
    /// # let config = LoadTestConfig::default();
    /// # let transport = Arc::new(ReqwestTransport::from_config(&config).unwrap());
    /// let mut suite = LoadTestSuite::new(config, transport).unwrap();
    /// suite.scenario("browse", |s| s.get("/").get("/products"));
    /// assert_eq!(suite.scenario_names(), vec!["browse"]);
    /// ```
    pub fn scenario<F>(&mut self, name: impl Into<String>, define: F) -> &mut Self
    where
        F: FnOnce(LoadScenario) -> LoadScenario,
    {
        let name = name.into();
        let scenario = define(LoadScenario::new(name.clone()));
        self.scenarios.insert(name, scenario);
        self
    }

    pub fn scenario_names(&self) -> Vec<&str> {
        self.scenarios.keys().map(String::as_str).collect()
    }

    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: Fn(&RequestResult) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
    }

    /// Run a registered scenario, optionally with a different configuration
    pub async fn run_scenario(
        &self,
        name: &str,
        overrides: Option<LoadTestConfig>,
    ) -> Result<TestResults, LoadTestError> {
        let scenario = self
            .scenarios
            .get(name)
            .ok_or_else(|| LoadTestError::ScenarioNotFound(name.to_string()))?;
        let config = overrides.unwrap_or_else(|| self.config.clone());
        self.runner(config)?.run(scenario).await
    }

    /// Every user fires `requests_per_user` requests at `url` per iteration,
    /// all users start at once
    pub async fn stress_test(
        &self,
        url: &str,
        users: usize,
        requests_per_user: usize,
    ) -> Result<TestResults, LoadTestError> {
        let scenario = (0..requests_per_user.max(1)).fold(LoadScenario::new("stress_test"), |s, i| {
            s.step(Step::new(format!("request_{i}"), HttpMethod::Get, url))
        });
        let config = self
            .config
            .clone()
            .with_concurrent_users(users)
            .with_ramp_up_time(Duration::ZERO);
        self.runner(config)?.run(&scenario).await
    }

    /// Endurance run: 50 users over one hour with a five minute ramp
    pub async fn soak_test(&self, url: &str) -> Result<TestResults, LoadTestError> {
        let scenario = LoadScenario::new("soak_test").step(Step::new("request", HttpMethod::Get, url));
        let config = self
            .config
            .clone()
            .with_concurrent_users(50)
            .with_duration(Duration::from_secs(3600))
            .with_ramp_up_time(Duration::from_secs(300));
        self.runner(config)?.run(&scenario).await
    }

    fn runner(&self, config: LoadTestConfig) -> Result<LoadTestRunner, LoadTestError> {
        let runner =
            LoadTestRunner::new(config, self.transport.clone())?.with_progress(self.progress.clone());
        Ok(match &self.metrics {
            Some(metrics) => runner.with_metrics(metrics.clone()),
            None => runner,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use async_trait::async_trait;

    use super::*;
    use crate::load::transport::{TransportError, TransportRequest, TransportResponse};

    struct CountingTransport {
        calls: AtomicU64,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(TransportResponse::new(200, "ok"))
        }
    }

    fn transport(delay: Duration) -> Arc<CountingTransport> {
        Arc::new(CountingTransport {
            calls: AtomicU64::new(0),
            delay,
        })
    }

    #[test]
    fn test_ramp_schedule() {
        let schedule = RampSchedule::new(10, Duration::from_secs(10));
        assert_eq!(schedule.target_users(Duration::ZERO), 0);
        assert_eq!(schedule.target_users(Duration::from_millis(10)), 1);
        assert_eq!(schedule.target_users(Duration::from_secs(2)), 2);
        assert_eq!(schedule.target_users(Duration::from_millis(2_500)), 3);
        assert_eq!(schedule.target_users(Duration::from_secs(5)), 5);
        assert_eq!(schedule.target_users(Duration::from_secs(30)), 10);

        let mut previous = 0;
        for ms in (0..12_000).step_by(50) {
            let target = schedule.target_users(Duration::from_millis(ms));
            assert!(target >= previous);
            assert!(target <= 10);
            previous = target;
        }
    }

    #[test]
    fn test_zero_ramp_launches_everyone() {
        let schedule = RampSchedule::new(4, Duration::ZERO);
        assert_eq!(schedule.target_users(Duration::ZERO), 4);
    }

    #[tokio::test]
    async fn test_empty_scenario_rejected() {
        let runner = LoadTestRunner::new(LoadTestConfig::default(), transport(Duration::ZERO)).unwrap();
        let err = runner.run(&LoadScenario::new("nothing")).await.unwrap_err();
        assert!(matches!(err, LoadTestError::EmptyScenario(name) if name == "nothing"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoadTestConfig::default().with_concurrent_users(0);
        assert!(matches!(
            LoadTestRunner::new(config, transport(Duration::ZERO)),
            Err(LoadTestError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_collects_results() {
        let config = LoadTestConfig::default()
            .with_concurrent_users(3)
            .with_duration(Duration::from_secs(5))
            .with_ramp_up_time(Duration::ZERO)
            .with_think_time(Duration::from_secs(1));
        let transport = transport(Duration::from_millis(50));
        let runner = LoadTestRunner::new(config, transport.clone()).unwrap();
        let scenario = LoadScenario::new("home").get("/");

        let results = runner.run(&scenario).await.unwrap();
        let summary = results.summary();
        assert!(summary.total_requests >= 3);
        assert_eq!(summary.total_requests, transport.calls.load(Ordering::SeqCst));
        assert_eq!(
            summary.total_requests,
            summary.successful_requests + summary.failed_requests
        );
        assert_eq!(runner.active_users(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_user_releases_active_count() {
        let config = LoadTestConfig::default()
            .with_concurrent_users(3)
            .with_duration(Duration::from_secs(2))
            .with_ramp_up_time(Duration::ZERO);
        let runner = LoadTestRunner::new(config, transport(Duration::from_millis(10)))
            .unwrap()
            .on_progress(|_| panic!("progress hook failed"));

        let results = runner.run(&LoadScenario::new("home").get("/")).await.unwrap();
        assert_eq!(results.summary().total_requests, 3);
        assert_eq!(runner.active_users(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suite_unknown_scenario() {
        let suite = LoadTestSuite::new(LoadTestConfig::default(), transport(Duration::ZERO)).unwrap();
        let err = suite.run_scenario("missing", None).await.unwrap_err();
        assert!(matches!(err, LoadTestError::ScenarioNotFound(name) if name == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suite_runs_registered_scenario_with_overrides() {
        let transport = transport(Duration::from_millis(10));
        let mut suite = LoadTestSuite::new(LoadTestConfig::default(), transport.clone()).unwrap();
        suite.scenario("browse", |s| s.get("/").get("/about"));
        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = seen.clone();
        suite.on_progress(move |_| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });

        let overrides = LoadTestConfig::default()
            .with_concurrent_users(2)
            .with_duration(Duration::from_secs(2))
            .with_ramp_up_time(Duration::ZERO)
            .with_think_time(Duration::ZERO);
        let results = suite.run_scenario("browse", Some(overrides)).await.unwrap();

        let by_step = results.results_by_step();
        assert_eq!(by_step.len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), results.summary().total_requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stress_test_preset() {
        let config = LoadTestConfig::default()
            .with_duration(Duration::from_secs(1))
            .with_think_time(Duration::ZERO);
        let transport = transport(Duration::from_millis(100));
        let suite = LoadTestSuite::new(config, transport).unwrap();

        let results = suite.stress_test("http://target.test/", 4, 3).await.unwrap();
        let by_step = results.results_by_step();
        assert_eq!(by_step.len(), 3);
        assert!(by_step.contains_key("request_0"));
        // 4 users, each iteration takes 300ms: 4 iterations before the deadline
        assert_eq!(results.summary().total_requests, 4 * 3 * 4);
    }
}
