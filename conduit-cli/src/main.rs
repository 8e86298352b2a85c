//! Conduit CLI
//!
//! Command-line interface for running Conduit pipelines.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn, LevelFilter};
use tokio_util::sync::CancellationToken;

use conduit_connector::{default_formats, ConnectorRegistry, Pipeline};
use conduit_core::{BoxSink, BoxSource, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Move data from a source connector into sink connectors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (off, error, warn, info, debug, trace); overrides the pipeline file
    #[arg(short, long, global = true)]
    log_level: Option<LevelFilter>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline YAML file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Check a pipeline's connector configuration without connecting
    Validate {
        /// Pipeline YAML file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available connectors and formats
    ListConnectors,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run { file } => {
            let config = load(&file)?;
            conduit_core::init_logging(cli.log_level.unwrap_or(config.log_level))?;
            run(&config).await
        }
        Commands::Validate { file } => {
            let config = load(&file)?;
            conduit_core::init_logging(cli.log_level.unwrap_or(config.log_level))?;
            validate(&config)?;
            println!(
                "Pipeline {} is valid: {} source, {} sink(s)",
                config.display_name(),
                config.source.connector_type,
                config.sinks.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::ListConnectors => {
            conduit_core::init_logging(cli.log_level.unwrap_or(LevelFilter::Warn))?;
            print!("{}", connector_listing(&ConnectorRegistry::with_defaults()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(file: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_yaml_file(file)
        .with_context(|| format!("Failed to load pipeline {}", file.display()))
}

fn build_connectors(
    registry: &ConnectorRegistry,
    config: &PipelineConfig,
) -> Result<(BoxSource, Vec<BoxSink>)> {
    let source = registry
        .source_from_spec(&config.source)
        .context("Failed to create source")?;

    let sinks = config
        .sinks
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            registry
                .sink_from_spec(spec)
                .with_context(|| format!("Failed to create sink {}", idx))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((source, sinks))
}

fn validate(config: &PipelineConfig) -> Result<()> {
    let registry = ConnectorRegistry::with_defaults();
    let (mut source, mut sinks) = build_connectors(&registry, config)?;
    Pipeline::validate(&mut source, &mut sinks)?;
    debug!("Pipeline {} validated", config.display_name());
    Ok(())
}

async fn run(config: &PipelineConfig) -> Result<ExitCode> {
    let registry = ConnectorRegistry::with_defaults();
    let (mut source, mut sinks) = build_connectors(&registry, config)?;

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            interrupt.cancel();
        }
    });

    info!("Running pipeline {}", config.display_name());
    let report = Pipeline::new(config.display_name())
        .with_cancellation(token)
        .run(&mut source, &mut sinks)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failures() > 0 || report.cancelled {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn connector_listing(registry: &ConnectorRegistry) -> String {
    let formats = default_formats();
    format!(
        "Sources: {}\nSinks: {}\nFormats: {}\n",
        registry.source_names().join(", "),
        registry.sink_names().join(", "),
        formats.identifiers().join(", ")
    )
}
