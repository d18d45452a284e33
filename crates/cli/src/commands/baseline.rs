// Baseline management commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use stampede::config::BaselineBackend;
use stampede::regression::{baseline_store_from_config, Baseline};
use stampede::StampedeConfig;
use tracing::warn;

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum BaselineCommand {
    /// List stored baselines
    List,

    /// Show one baseline
    Show {
        /// Test name
        name: String,
    },

    /// Delete a baseline
    Delete {
        /// Test name
        name: String,
    },
}

pub async fn run(command: BaselineCommand, config: &StampedeConfig, output: OutputFormat) -> Result<()> {
    if config.regression.storage_backend == BaselineBackend::Memory {
        warn!("Baseline storage backend is `memory`; nothing persists between runs");
    }
    let store = baseline_store_from_config(&config.regression);

    match command {
        BaselineCommand::List => {
            let baselines = store.list_all().await.context("Failed to list baselines")?;
            if !output.is_text() {
                return output.print_value(&baselines);
            }
            if baselines.is_empty() {
                println!("No baselines found");
                return Ok(());
            }

            print_table_header(&[
                ("TEST", 32),
                ("MEAN MS", 10),
                ("P95 MS", 10),
                ("SAMPLES", 8),
                ("VERSION", 10),
                ("UPDATED", 20),
            ]);
            for (name, baseline) in &baselines {
                let d = &baseline.statistics.duration;
                print_table_row(&[
                    (name, 32),
                    (&format!("{:.2}", d.mean), 10),
                    (&format!("{:.2}", d.percentiles.p95), 10),
                    (&baseline.statistics.sample_count.to_string(), 8),
                    (&baseline.version, 10),
                    (&format_timestamp(baseline.updated_at), 20),
                ]);
            }
            Ok(())
        }
        BaselineCommand::Show { name } => {
            let baseline = store
                .get(&name)
                .await
                .with_context(|| format!("Failed to read baseline: {name}"))?
                .with_context(|| format!("No baseline stored for {name}"))?;
            if output.is_text() {
                print_baseline(&name, &baseline);
                Ok(())
            } else {
                output.print_value(&baseline)
            }
        }
        BaselineCommand::Delete { name } => {
            store
                .delete(&name)
                .await
                .with_context(|| format!("Failed to delete baseline: {name}"))?;
            if output.is_text() {
                println!("Deleted baseline: {name}");
                Ok(())
            } else {
                output.print_value(&serde_json::json!({ "deleted": name }))
            }
        }
    }
}

fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn print_baseline(name: &str, baseline: &Baseline) {
    let stats = &baseline.statistics;
    print_field("Test", name);
    print_field("Version", &baseline.version);
    print_field("Updated", &format_timestamp(baseline.updated_at));
    print_field("Samples", &stats.sample_count.to_string());
    print_field("Success rate", &format!("{:.2}%", stats.success_rate * 100.0));

    let d = &stats.duration;
    print_field("Duration mean", &format!("{:.3} ms (stddev {:.3})", d.mean, d.stddev));
    print_field("Duration median", &format!("{:.3} ms", d.median));
    print_field("Duration min/max", &format!("{:.3} / {:.3} ms", d.min, d.max));
    let p = &d.percentiles;
    let tail = format!("{:.3} / {:.3} / {:.3} ms", p.p90, p.p95, p.p99);
    print_field("Duration p90/95/99", &tail);

    let m = &stats.memory;
    print_field("Memory mean", &format!("{:.0} bytes (stddev {:.0})", m.mean, m.stddev));
}
