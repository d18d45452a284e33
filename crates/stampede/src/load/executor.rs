//! Executes one scenario step: interpolate, send, extract, validate, record

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::context::{json_path, ExecutionContext};
use super::recorder::{RequestResult, ResultRecorder, ValidationDetail, ValidationOutcome};
use super::scenario::{ExtractSource, Step, StepBody, Validator};
use super::transport::{Transport, TransportRequest, TransportResponse};
use crate::metrics::{tags, MetricsCollector};

/// Timing metric emitted per executed step
pub const REQUEST_METRIC: &str = "loadtest.request";

/// Counter incremented per failed step
pub const ERROR_METRIC: &str = "loadtest.errors";

pub struct StepExecutor {
    transport: Arc<dyn Transport>,
    recorder: Arc<ResultRecorder>,
    metrics: Option<Arc<MetricsCollector>>,
    scenario: String,
}

impl StepExecutor {
    pub fn new(transport: Arc<dyn Transport>, recorder: Arc<ResultRecorder>) -> Self {
        Self {
            transport,
            recorder,
            metrics: None,
            scenario: String::new(),
        }
    }

    pub fn with_metrics(mut self, collector: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = collector;
        self
    }

    /// Scenario name used to tag emitted metrics
    pub fn with_scenario_name(mut self, name: impl Into<String>) -> Self {
        self.scenario = name.into();
        self
    }

    /// Interpolate the step against `ctx`. JSON bodies are serialized and get
    /// a JSON content type.
    pub fn build_request(step: &Step, ctx: &ExecutionContext) -> TransportRequest {
        let mut headers = ctx.interpolate_headers(&step.headers);
        let body = match &step.body {
            None => None,
            Some(StepBody::Text(text)) => Some(ctx.interpolate(text)),
            Some(StepBody::Json(value)) => {
                headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                Some(ctx.interpolate_value(value).to_string())
            }
        };

        TransportRequest {
            method: step.method,
            url: ctx.interpolate(&step.url),
            headers,
            body,
        }
    }

    /// Run one step and record its result. Never fails: transport errors and
    /// failed validations become unsuccessful results.
    pub async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> RequestResult {
        let request = Self::build_request(step, ctx);
        let url = request.url.clone();
        let timestamp = Utc::now();
        let started = Instant::now();

        let outcome = self.transport.send(request).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(response) => {
                let json_body = parse_json_body(step, &response);
                extract(step, &response, json_body.as_ref(), ctx);
                let validation = validate(step, &response, json_body.as_ref());
                RequestResult {
                    step: step.name.clone(),
                    method: step.method,
                    url,
                    status_code: response.status,
                    duration_ms,
                    bytes: response.byte_len(),
                    timestamp,
                    success: validation.as_ref().map_or(true, |v| v.passed),
                    error: None,
                    validation,
                }
            }
            Err(e) => {
                debug!(step = %step.name, url = %url, error = %e, "Request failed");
                RequestResult {
                    step: step.name.clone(),
                    method: step.method,
                    url,
                    status_code: 0,
                    duration_ms,
                    bytes: 0,
                    timestamp,
                    success: false,
                    error: Some(e.to_string()),
                    validation: None,
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            let metric_tags = tags([
                ("scenario", self.scenario.as_str()),
                ("step", step.name.as_str()),
            ]);
            metrics.record_timing(REQUEST_METRIC, duration_ms, metric_tags.clone());
            if !result.success {
                metrics.increment(ERROR_METRIC, 1, metric_tags);
            }
        }

        self.recorder.record(result.clone());
        result
    }
}

fn parse_json_body(step: &Step, response: &TransportResponse) -> Option<Value> {
    let needs_json = step
        .extract
        .iter()
        .any(|rule| matches!(rule.source, ExtractSource::Json { .. }))
        || step
            .validate
            .iter()
            .any(|rule| matches!(rule.check, Validator::Json { .. }));
    if !needs_json {
        return None;
    }
    serde_json::from_str(&response.body).ok()
}

fn extract(
    step: &Step,
    response: &TransportResponse,
    json_body: Option<&Value>,
    ctx: &mut ExecutionContext,
) {
    for rule in &step.extract {
        match &rule.source {
            ExtractSource::Json { path } => {
                let value = json_body
                    .and_then(|body| json_path(body, path))
                    .cloned()
                    .unwrap_or(Value::Null);
                ctx.set(rule.variable.clone(), value);
            }
            ExtractSource::Header { name } => {
                let value = response.header(name).unwrap_or_default().to_string();
                ctx.set(rule.variable.clone(), value);
            }
            ExtractSource::Regex { pattern, group } => {
                if let Some(m) = pattern
                    .captures(&response.body)
                    .and_then(|caps| caps.get(*group))
                {
                    ctx.set(rule.variable.clone(), m.as_str());
                }
            }
        }
    }
}

fn validate(
    step: &Step,
    response: &TransportResponse,
    json_body: Option<&Value>,
) -> Option<ValidationOutcome> {
    if step.validate.is_empty() {
        return None;
    }
    let details: Vec<ValidationDetail> = step
        .validate
        .iter()
        .map(|rule| {
            let (passed, actual, expected) = rule.evaluate(
                response.status,
                |name| response.header(name).map(str::to_string),
                json_body,
            );
            ValidationDetail {
                name: rule.name.clone(),
                passed,
                actual,
                expected,
            }
        })
        .collect();
    Some(ValidationOutcome {
        passed: details.iter().all(|d| d.passed),
        details,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::config::MetricsConfig;
    use crate::load::scenario::{Expectation, ExtractRule, HttpMethod, ValidationRule};
    use crate::load::transport::TransportError;

    /// Replays canned responses and remembers every request
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(TransportResponse::new(200, "")))
        }
    }

    fn executor(transport: Arc<ScriptedTransport>) -> (StepExecutor, Arc<ResultRecorder>) {
        let recorder = Arc::new(ResultRecorder::new());
        (StepExecutor::new(transport, recorder.clone()), recorder)
    }

    #[test]
    fn test_build_request_json_body() {
        let mut ctx = ExecutionContext::empty();
        ctx.set("id", 5);
        let step = Step::new("create", HttpMethod::Post, "/items/{{id}}")
            .with_header("content-type", "text/plain")
            .with_header("X-User", "{{id}}")
            .with_body(json!({"parent": "{{id}}", "name": "{{unknown}}"}));

        let request = StepExecutor::build_request(&step, &ctx);
        assert_eq!(request.url, "/items/5");
        assert_eq!(request.headers["Content-Type"], "application/json");
        assert!(!request.headers.contains_key("content-type"));
        assert_eq!(request.headers["X-User"], "5");
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"parent": "5", "name": "{{unknown}}"}));
    }

    #[tokio::test]
    async fn test_extract_then_interpolate_next_step() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(200, r#"{"data":{"token":"t-1"}}"#)
                .with_header("X-Session", "s-9")),
            Ok(TransportResponse::new(200, "order=ord-77;")),
            Ok(TransportResponse::new(200, "")),
        ]);
        let (executor, _) = executor(transport.clone());
        let mut ctx = ExecutionContext::empty();

        let login = Step::new("login", HttpMethod::Post, "/login").with_extract(vec![
            ExtractRule::json("token", "data.token"),
            ExtractRule::header("session", "x-session"),
        ]);
        let order = Step::new("order", HttpMethod::Get, "/order")
            .with_extract(vec![ExtractRule::regex("order_id", r"order=([\w-]+);", 1).unwrap()]);
        let fetch = Step::new("fetch", HttpMethod::Get, "/o/{{order_id}}?t={{token}}&s={{session}}");

        executor.execute(&login, &mut ctx).await;
        executor.execute(&order, &mut ctx).await;
        let result = executor.execute(&fetch, &mut ctx).await;

        assert_eq!(result.url, "/o/ord-77?t=t-1&s=s-9");
        assert_eq!(transport.requests.lock()[2].url, "/o/ord-77?t=t-1&s=s-9");
    }

    #[tokio::test]
    async fn test_failed_validation_marks_result() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(
            500,
            r#"{"status":"error"}"#,
        ))]);
        let (executor, recorder) = executor(transport);
        let step = Step::new("health", HttpMethod::Get, "/health").with_validate(vec![
            ValidationRule::status(200),
            ValidationRule::json("status", Expectation::equals("error")),
        ]);

        let result = executor.execute(&step, &mut ExecutionContext::empty()).await;
        assert!(!result.success);
        assert_eq!(result.status_code, 500);
        let validation = result.validation.unwrap();
        assert!(!validation.passed);
        assert!(!validation.details[0].passed);
        assert!(validation.details[1].passed);
        assert_eq!(recorder.metrics().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_non_2xx_without_validation_is_success() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(404, "missing"))]);
        let (executor, _) = executor(transport);
        let step = Step::new("page", HttpMethod::Get, "/page");
        let result = executor.execute(&step, &mut ExecutionContext::empty()).await;
        assert!(result.success);
        assert_eq!(result.bytes, 7);
    }

    #[tokio::test]
    async fn test_transport_error_is_recorded() {
        let transport = ScriptedTransport::new(vec![Err(TransportError("connection refused".into()))]);
        let (executor, recorder) = executor(transport);
        let step = Step::new("down", HttpMethod::Get, "/down");

        let result = executor.execute(&step, &mut ExecutionContext::empty()).await;
        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert_eq!(result.bytes, 0);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_glue() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(200, "")),
            Err(TransportError("timeout".into())),
        ]);
        let collector = Arc::new(MetricsCollector::from_config(MetricsConfig::default()).unwrap());
        let recorder = Arc::new(ResultRecorder::new());
        let executor = StepExecutor::new(transport, recorder)
            .with_metrics(Some(collector.clone()))
            .with_scenario_name("smoke");
        let step = Step::new("home", HttpMethod::Get, "/");
        let mut ctx = ExecutionContext::empty();

        executor.execute(&step, &mut ctx).await;
        executor.execute(&step, &mut ctx).await;

        let step_tags = tags([("scenario", "smoke"), ("step", "home")]);
        assert_eq!(collector.percentiles(REQUEST_METRIC, &step_tags).unwrap().count, 2);
        let snapshot = collector.snapshot();
        let errors = snapshot.counters.values().find(|c| c.name == ERROR_METRIC).unwrap();
        assert_eq!(errors.value, 1);
    }
}
