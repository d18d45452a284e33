//! Snapshot exporters: JSON, Prometheus text exposition, Graphite plaintext

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::histogram::HistogramSummary;
use super::Tags;

/// Output format for [`MetricsSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Prometheus,
    Graphite,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "prometheus" => Ok(Self::Prometheus),
            "graphite" => Ok(Self::Graphite),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterValue {
    pub name: String,
    pub value: u64,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeValue {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view of the collector's current state, keyed by metric key
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub counters: BTreeMap<String, CounterValue>,
    pub gauges: BTreeMap<String, GaugeValue>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Prometheus text exposition. Histograms are exported as summaries with
    /// one `quantile` sample per entry in `percentiles` (0-100 scale).
    ///
    /// Series sharing a metric name form one family under a single `# TYPE`
    /// line.
    pub fn to_prometheus(&self, percentiles: &[f64]) -> String {
        let mut lines = Vec::new();

        for (name, counters) in families(self.counters.values(), |c| c.name.as_str()) {
            lines.push(format!("# TYPE {name} counter"));
            for counter in counters {
                lines.push(format!(
                    "{name}{} {}",
                    prometheus_labels(&counter.tags, None),
                    counter.value
                ));
            }
        }

        for (name, gauges) in families(self.gauges.values(), |g| g.name.as_str()) {
            lines.push(format!("# TYPE {name} gauge"));
            for gauge in gauges {
                lines.push(format!(
                    "{name}{} {}",
                    prometheus_labels(&gauge.tags, None),
                    gauge.value
                ));
            }
        }

        for (name, histograms) in families(self.histograms.values(), |h| h.name.as_str()) {
            lines.push(format!("# TYPE {name} summary"));
            for histogram in histograms {
                let labels = prometheus_labels(&histogram.tags, None);
                lines.push(format!("{name}_count{labels} {}", histogram.count));
                lines.push(format!("{name}_sum{labels} {}", histogram.sum));
                for p in percentiles {
                    let quantile = p / 100.0;
                    lines.push(format!(
                        "{name}{} {}",
                        prometheus_labels(&histogram.tags, Some(quantile)),
                        histogram.percentile(*p)
                    ));
                }
            }
        }

        lines.join("\n")
    }

    /// Graphite plaintext: `path value unix_ts` per line
    pub fn to_graphite(&self, percentiles: &[f64]) -> String {
        let ts = self.timestamp.timestamp();
        let mut out = String::new();

        for counter in self.counters.values() {
            let path = graphite_path(&counter.name, &counter.tags);
            let _ = writeln!(out, "{path} {} {ts}", counter.value);
        }

        for gauge in self.gauges.values() {
            let path = graphite_path(&gauge.name, &gauge.tags);
            let _ = writeln!(out, "{path} {} {ts}", gauge.value);
        }

        for histogram in self.histograms.values() {
            let path = graphite_path(&histogram.name, &histogram.tags);
            let _ = writeln!(out, "{path}.count {} {ts}", histogram.count);
            let _ = writeln!(out, "{path}.mean {} {ts}", histogram.mean);
            let _ = writeln!(out, "{path}.min {} {ts}", histogram.min);
            let _ = writeln!(out, "{path}.max {} {ts}", histogram.max);
            for p in percentiles {
                let _ = writeln!(out, "{path}.p{p} {} {ts}", histogram.percentile(*p));
            }
        }

        out.trim_end().to_string()
    }
}

/// Group series by their Prometheus metric name, keeping key order within
/// each family
fn families<'a, T>(
    series: impl Iterator<Item = &'a T>,
    name: impl Fn(&T) -> &str,
) -> BTreeMap<String, Vec<&'a T>>
where
    T: 'a,
{
    let mut grouped: BTreeMap<String, Vec<&'a T>> = BTreeMap::new();
    for item in series {
        grouped.entry(prometheus_name(name(item))).or_default().push(item);
    }
    grouped
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

fn prometheus_labels(tags: &Tags, quantile: Option<f64>) -> String {
    let mut labels: Vec<String> = tags
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    if let Some(q) = quantile {
        labels.push(format!("quantile=\"{q}\""));
    }
    if labels.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", labels.join(","))
    }
}

fn graphite_path(name: &str, tags: &Tags) -> String {
    let mut parts = vec![name.to_string()];
    for (k, v) in tags {
        parts.push(format!("{k}.{v}"));
    }
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::metrics::{tags, MetricHistogram};

    fn snapshot() -> MetricsSnapshot {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut hist = MetricHistogram::new("http.latency", tags([("route", "home")]));
        for v in [10.0, 20.0, 30.0, 40.0] {
            hist.record(v);
        }

        let mut counters = BTreeMap::new();
        counters.insert(
            "requests:".to_string(),
            CounterValue {
                name: "requests".to_string(),
                value: 42,
                tags: Tags::new(),
            },
        );
        let mut gauges = BTreeMap::new();
        gauges.insert(
            "queue.depth:".to_string(),
            GaugeValue {
                name: "queue.depth".to_string(),
                value: 7.5,
                tags: Tags::new(),
                timestamp: ts,
            },
        );
        let mut histograms = BTreeMap::new();
        histograms.insert("http.latency:route=home".to_string(), hist.summary(&[50.0, 99.0]));

        MetricsSnapshot {
            timestamp: ts,
            counters,
            gauges,
            histograms,
        }
    }

    #[test]
    fn test_prometheus_export() {
        let text = snapshot().to_prometheus(&[50.0, 99.0]);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"# TYPE requests counter"));
        assert!(lines.contains(&"requests 42"));
        assert!(lines.contains(&"# TYPE queue_depth gauge"));
        assert!(lines.contains(&"queue_depth 7.5"));
        assert!(lines.contains(&"# TYPE http_latency summary"));
        assert!(lines.contains(&"http_latency_count{route=\"home\"} 4"));
        assert!(lines.contains(&"http_latency_sum{route=\"home\"} 100"));
        assert!(lines.contains(&"http_latency{route=\"home\",quantile=\"0.5\"} 20"));
        assert!(lines.contains(&"http_latency{route=\"home\",quantile=\"0.99\"} 40"));
    }

    #[test]
    fn test_prometheus_one_type_line_per_family() {
        let mut snap = snapshot();
        for (step, value) in [("login", 12.0), ("cart", 30.0)] {
            let mut hist = MetricHistogram::new("loadtest.request", tags([("step", step)]));
            hist.record(value);
            snap.histograms
                .insert(format!("loadtest.request:step={step}"), hist.summary(&[50.0]));
        }
        for route in ["/a", "/b"] {
            snap.counters.insert(
                format!("loadtest.errors:route={route}"),
                CounterValue {
                    name: "loadtest.errors".to_string(),
                    value: 1,
                    tags: tags([("route", route)]),
                },
            );
        }

        let text = snap.to_prometheus(&[50.0]);
        let lines: Vec<&str> = text.lines().collect();
        let type_lines = |needle: &str| lines.iter().filter(|l| **l == needle).count();
        assert_eq!(type_lines("# TYPE loadtest_request summary"), 1);
        assert_eq!(type_lines("# TYPE loadtest_errors counter"), 1);

        let header = lines
            .iter()
            .position(|l| *l == "# TYPE loadtest_request summary")
            .unwrap();
        let family: Vec<&str> = lines[header + 1..]
            .iter()
            .take_while(|l| !l.starts_with("# TYPE"))
            .copied()
            .collect();
        assert!(family.contains(&"loadtest_request_count{step=\"login\"} 1"));
        assert!(family.contains(&"loadtest_request_count{step=\"cart\"} 1"));
        assert!(family.contains(&"loadtest_request{step=\"cart\",quantile=\"0.5\"} 30"));
    }

    #[test]
    fn test_graphite_export() {
        let text = snapshot().to_graphite(&[50.0]);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"requests 42 1700000000"));
        assert!(lines.contains(&"queue.depth 7.5 1700000000"));
        assert!(lines.contains(&"http.latency.route.home.count 4 1700000000"));
        assert!(lines.contains(&"http.latency.route.home.mean 25 1700000000"));
        assert!(lines.contains(&"http.latency.route.home.p50 20 1700000000"));
    }

    #[test]
    fn test_json_export_shape() {
        let json = snapshot().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["counters"]["requests:"]["value"], 42);
        assert_eq!(value["histograms"]["http.latency:route=home"]["p50"], 20.0);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("Prometheus".parse::<ExportFormat>().unwrap(), ExportFormat::Prometheus);
        assert!("statsd".parse::<ExportFormat>().is_err());
    }
}
