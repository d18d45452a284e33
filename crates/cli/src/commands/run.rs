// Load test command

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use stampede::load::{
    HttpMethod, LoadScenario, LoadTestRunner, ReqwestTransport, Step, StepStats, TestSummary,
    ValidationRule,
};
use stampede::metrics::{ExportFormat, MetricsCollector};
use stampede::StampedeConfig;
use tracing::warn;

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Target URL (absolute, or a path joined onto `load.base_url`)
    #[arg(long)]
    pub url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: HttpMethod,

    /// Request body
    #[arg(long)]
    pub body: Option<String>,

    /// Concurrent virtual users
    #[arg(long, short)]
    pub users: Option<usize>,

    /// Run duration in seconds
    #[arg(long, short)]
    pub duration: Option<f64>,

    /// Ramp-up time in seconds
    #[arg(long)]
    pub ramp_up: Option<f64>,

    /// Pause after each request in seconds
    #[arg(long)]
    pub think_time: Option<f64>,

    /// Mark responses with any other status as failed
    #[arg(long)]
    pub expect_status: Option<u16>,

    /// Request header as `name:value` (repeatable)
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Also print collected request metrics in this format
    #[arg(long, value_parser = ["json", "prometheus", "graphite"])]
    pub metrics_format: Option<String>,
}

#[derive(Serialize)]
struct RunReport {
    scenario: String,
    summary: TestSummary,
    steps: BTreeMap<String, StepStats>,
    errors: BTreeMap<String, u64>,
}

pub async fn run(args: RunArgs, config: StampedeConfig, output: OutputFormat) -> Result<()> {
    let mut load = config.load;
    if let Some(users) = args.users {
        load = load.with_concurrent_users(users);
    }
    if let Some(secs) = args.duration {
        load = load.with_duration(seconds("--duration", secs)?);
    }
    if let Some(secs) = args.ramp_up {
        load = load.with_ramp_up_time(seconds("--ramp-up", secs)?);
    }
    if let Some(secs) = args.think_time {
        load = load.with_think_time(seconds("--think-time", secs)?);
    }

    let scenario = LoadScenario::new("cli").step(build_step(&args)?);
    let transport =
        Arc::new(ReqwestTransport::from_config(&load).context("Failed to create HTTP client")?);

    let mut runner = LoadTestRunner::new(load, transport).context("Invalid load test configuration")?;
    let collector = match &args.metrics_format {
        Some(_) => Some(Arc::new(
            MetricsCollector::from_config(config.metrics).context("Invalid metrics configuration")?,
        )),
        None => None,
    };
    if let Some(collector) = &collector {
        runner = runner.with_metrics(collector.clone());
    }

    let token = runner.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping load test");
            token.cancel();
        }
    });
    let results = runner.run(&scenario).await;
    interrupt.abort();
    let results = results.context("Load test failed")?;

    let report = RunReport {
        scenario: scenario.name().to_string(),
        summary: results.summary(),
        steps: results.results_by_step(),
        errors: results.errors(),
    };

    if output.is_text() {
        print_report(&report);
    } else {
        output.print_value(&report)?;
    }

    if let (Some(format), Some(collector)) = (&args.metrics_format, &collector) {
        let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
        println!();
        println!("{}", collector.export(format)?);
    }

    Ok(())
}

fn build_step(args: &RunArgs) -> Result<Step> {
    let mut step = Step::new(format!("{} {}", args.method, args.url), args.method, &args.url);
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        step = step.with_header(name, value);
    }
    if let Some(body) = &args.body {
        step = step.with_body(body.as_str());
    }
    if let Some(status) = args.expect_status {
        step = step.with_validate(vec![ValidationRule::status(status)]);
    }
    Ok(step)
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Invalid header (expected name:value): {raw}"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Invalid header (empty name): {raw}");
    }
    Ok((name, value.trim()))
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid value for {flag}: {secs}"))
}

fn print_report(report: &RunReport) {
    let s = &report.summary;
    print_field("Scenario", &report.scenario);
    print_field("Duration", &format!("{:.2}s", s.duration_secs));
    print_field("Requests", &s.total_requests.to_string());
    print_field("Successful", &s.successful_requests.to_string());
    print_field("Failed", &s.failed_requests.to_string());
    print_field("Success rate", &format!("{:.2}%", s.success_rate * 100.0));
    print_field("Requests/sec", &format!("{:.2}", s.requests_per_second));
    print_field("Bytes/sec", &format!("{:.0}", s.bytes_per_second));
    print_field("Avg response", &format!("{:.2} ms", s.average_response_time));
    let range = format!("{:.2} / {:.2} ms", s.min_response_time, s.max_response_time);
    print_field("Min / max", &range);
    let p = &s.percentiles;
    let tail = format!("{:.2} / {:.2} / {:.2} ms", p.p50, p.p95, p.p99);
    print_field("p50 / p95 / p99", &tail);

    println!();
    print_table_header(&[
        ("STEP", 32),
        ("COUNT", 8),
        ("FAILED", 8),
        ("AVG MS", 10),
        ("MAX MS", 10),
    ]);
    for (name, step) in &report.steps {
        print_table_row(&[
            (name, 32),
            (&step.count.to_string(), 8),
            (&step.failed.to_string(), 8),
            (&format!("{:.2}", step.avg_duration), 10),
            (&format!("{:.2}", step.max_duration), 10),
        ]);
    }

    if !report.errors.is_empty() {
        println!();
        print_table_header(&[("ERROR", 52), ("COUNT", 8)]);
        for (error, count) in &report.errors {
            print_table_row(&[(error, 52), (&count.to_string(), 8)]);
        }
    }
}
