// Stampede CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: A YAML config file supplies defaults; flags override it.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stampede::StampedeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stampede")]
#[command(about = "Stampede - HTTP load testing and performance baselines")]
#[command(version)]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, short, global = true, env = "STAMPEDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load test against a single URL
    Run(commands::run::RunArgs),

    /// Inspect and manage stored performance baselines
    Baseline {
        #[command(subcommand)]
        command: commands::baseline::BaselineCommand,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<StampedeConfig> {
    match path {
        Some(path) => StampedeConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(StampedeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stampede=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, config, output_format).await,
        Commands::Baseline { command } => {
            commands::baseline::run(command, &config, output_format).await
        }
    }
}
