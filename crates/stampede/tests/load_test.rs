// Integration tests for ramped load runs over an in-process transport
//
// Time is paused so ramp-up, think time and request latency are
// deterministic without opening sockets.
//
// Run with: cargo test -p stampede --test load_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use stampede::load::{
    ExtractRule, HttpMethod, LoadScenario, LoadTestError, LoadTestRunner, LoadTestSuite, Transport,
    TransportError, TransportRequest, TransportResponse, ValidationRule, ERROR_METRIC,
    REQUEST_METRIC,
};
use stampede::metrics::{tags, InMemoryMetricStorage, MetricsCollector};
use stampede::{LoadTestConfig, MetricsConfig};

/// Answers every request after a fixed latency; every `fail_every`-th call errors
struct FakeApi {
    latency: Duration,
    fail_every: usize,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl FakeApi {
    fn new(latency_ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            fail_every: 0,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = n;
        self
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request.clone());
        tokio::time::sleep(self.latency).await;

        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(TransportError("connection reset".to_string()));
        }
        if request.url.ends_with("/login") {
            return Ok(TransportResponse::new(200, json!({"token": "abc123"}).to_string())
                .with_header("Content-Type", "application/json"));
        }
        Ok(TransportResponse::new(200, r#"{"items":[1,2,3]}"#))
    }
}

fn config(users: usize, duration_secs: u64, ramp_secs: u64) -> LoadTestConfig {
    LoadTestConfig::default()
        .with_concurrent_users(users)
        .with_duration(Duration::from_secs(duration_secs))
        .with_ramp_up_time(Duration::from_secs(ramp_secs))
        .with_think_time(Duration::from_millis(400))
}

fn login_flow() -> LoadScenario {
    LoadScenario::new("login_flow")
        .post("/login", json!({"user": "{{user_id}}"}))
        .named("login")
        .extract(vec![ExtractRule::json("token", "token")])
        .validate(vec![ValidationRule::status(200)])
        .get("/items")
        .named("items")
        .header("Authorization", "Bearer {{token}}")
}

#[tokio::test(start_paused = true)]
async fn test_run_counts_add_up() {
    let api = Arc::new(FakeApi::new(100).failing_every(5));
    let runner = LoadTestRunner::new(config(3, 5, 0), api.clone()).unwrap();

    let results = runner.run(&login_flow()).await.unwrap();
    let summary = results.summary();

    assert!(summary.total_requests > 0);
    assert_eq!(
        summary.total_requests,
        summary.successful_requests + summary.failed_requests
    );
    assert_eq!(summary.total_requests as usize, api.calls.load(Ordering::SeqCst));
    assert_eq!(results.errors()["connection reset"], summary.failed_requests);

    let by_step = results.results_by_step();
    assert!(by_step.contains_key("login"));
    assert!(by_step.contains_key("items"));
}

#[tokio::test(start_paused = true)]
async fn test_extracted_token_reaches_next_step() {
    let api = Arc::new(FakeApi::new(50));
    let runner = LoadTestRunner::new(config(1, 1, 0), api.clone()).unwrap();
    runner.run(&login_flow()).await.unwrap();

    let requests = api.requests.lock();
    let login = &requests[0];
    assert_eq!(login.method, HttpMethod::Post);
    assert!(login.body.as_deref().unwrap_or_default().contains("user_"));

    let items = &requests[1];
    assert_eq!(
        items.headers.get("Authorization").map(String::as_str),
        Some("Bearer abc123")
    );
}

#[tokio::test(start_paused = true)]
async fn test_ramp_up_is_monotonic() {
    let api = Arc::new(FakeApi::new(100));
    let runner = LoadTestRunner::new(config(10, 12, 10), api).unwrap();
    let scenario = LoadScenario::new("browse").get("/items");

    let sampler = async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let at_2s = runner.active_users();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let at_5s = runner.active_users();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let at_11s = runner.active_users();
        (at_2s, at_5s, at_11s)
    };

    let (results, (at_2s, at_5s, at_11s)) = tokio::join!(runner.run(&scenario), sampler);
    results.unwrap();

    assert!(at_2s >= 1, "no users running at 2s");
    assert!(at_5s >= at_2s);
    assert!(at_5s <= 10);
    assert_eq!(at_11s, 10);
    assert_eq!(runner.active_users(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_the_run() {
    let api = Arc::new(FakeApi::new(100));
    let runner = LoadTestRunner::new(config(4, 3600, 0), api).unwrap();
    let token = runner.cancellation_token();
    let scenario = LoadScenario::new("browse").get("/items");

    let canceller = async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
    };
    let (results, ()) = tokio::join!(runner.run(&scenario), canceller);

    let results = results.unwrap();
    assert!(results.summary().total_requests > 0);
    assert!(results.metrics().elapsed_secs() < 3600.0);
}

#[tokio::test(start_paused = true)]
async fn test_load_run_feeds_metrics_collector() {
    let storage = Arc::new(InMemoryMetricStorage::new());
    let collector = Arc::new(
        MetricsCollector::new(
            MetricsConfig::default().with_flush_interval(Duration::ZERO),
            storage.clone(),
        )
        .unwrap(),
    );
    let api = Arc::new(FakeApi::new(100).failing_every(2));
    let runner = LoadTestRunner::new(config(2, 2, 0), api)
        .unwrap()
        .with_metrics(collector.clone());

    let results = runner
        .run(&LoadScenario::new("checkout").get("/cart").named("cart"))
        .await
        .unwrap();
    let summary = results.summary();

    let step_tags = tags([("scenario", "checkout"), ("step", "cart")]);
    let timings = collector.percentiles(REQUEST_METRIC, &step_tags).unwrap();
    assert_eq!(timings.count, summary.total_requests);

    let snapshot = collector.snapshot();
    let errors: u64 = snapshot
        .counters
        .values()
        .filter(|c| c.name == ERROR_METRIC)
        .map(|c| c.value)
        .sum();
    assert_eq!(errors, summary.failed_requests);

    let flushed = collector.flush().await.unwrap();
    assert_eq!(flushed as u64, summary.total_requests + summary.failed_requests);
    assert_eq!(storage.metric_count(), flushed);
}

#[tokio::test(start_paused = true)]
async fn test_suite_registry_and_presets() {
    let api = Arc::new(FakeApi::new(10));
    let mut suite = LoadTestSuite::new(config(2, 1, 0), api.clone()).unwrap();
    suite.scenario("home", |s| s.get("/").validate(vec![ValidationRule::status(200)]));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    suite.on_progress(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(suite.scenario_names(), vec!["home"]);
    let results = suite.run_scenario("home", None).await.unwrap();
    assert_eq!(
        seen.load(Ordering::SeqCst) as u64,
        results.summary().total_requests
    );

    let missing = suite.run_scenario("checkout", None).await.unwrap_err();
    assert!(matches!(missing, LoadTestError::ScenarioNotFound(name) if name == "checkout"));

    let stress = suite.stress_test("/ping", 4, 3).await.unwrap();
    assert_eq!(stress.results_by_step().len(), 3);
    assert!(stress.summary().total_requests >= 12);
}
