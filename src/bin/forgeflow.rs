//! ForgeFlow CLI - thin wrapper around the pipeline executor
//!
//! Pipelines are read from a YAML, JSON or TOML pipelines file. Runner settings
//! come from an optional TOML file and `FORGEFLOW_*` environment variables.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use forgeflow::config::ResilienceConfig;
use forgeflow::types::{PipelineResult, TransformOutcome};
use forgeflow::{ComponentRegistry, Executor, PipelineDefinition, PipelineFile, RunnerConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forgeflow")]
#[command(about = "ForgeFlow - declarative ETL pipeline runner")]
#[command(version)]
struct Cli {
    /// Pipelines file
    #[arg(short, long, global = true, default_value = "pipelines.yaml")]
    config: PathBuf,

    /// Runner settings file
    #[arg(long, global = true)]
    runner_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline
    Run {
        name: String,
        /// Per-run deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run every enabled pipeline
    RunAll {
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },

    /// List configured pipelines
    List,

    /// Validate the pipelines file without fetching anything
    Validate,

    /// Fetch once from a pipeline's connector
    Test { name: String },

    /// Fetch and transform without writing to sinks
    DryRun { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut runner = RunnerConfig::load(cli.runner_config.as_deref())
        .context("Failed to load runner configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&runner.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = PipelineFile::from_file(&cli.config)
        .with_context(|| format!("Failed to load pipelines from {}", cli.config.display()))?;

    match cli.command {
        Commands::List => {
            list(&file);
            Ok(())
        }
        Commands::Validate => validate(&file, &cli.config),
        Commands::Test { name } => {
            let executor = Executor::new().with_runner_config(runner);
            let pipeline = find(&file, &name)?;
            let payload = executor.check_connector(pipeline).await?;
            println!(
                "Connector {} for pipeline {} is reachable ({} bytes)",
                pipeline.connector.kind,
                name,
                payload.to_string().len()
            );
            Ok(())
        }
        Commands::DryRun { name } => {
            let executor = Executor::new().with_runner_config(runner);
            let report = executor.dry_run(find(&file, &name)?).await?;
            println!("Fetched payload:\n{}", serde_json::to_string_pretty(&report.payload)?);
            match report.outcome {
                TransformOutcome::Keep(record) => {
                    println!("Transformed record:\n{}", serde_json::to_string_pretty(&record)?)
                }
                TransformOutcome::Drop => println!("Record dropped by the transformer"),
            }
            Ok(())
        }
        Commands::Run { name, timeout, json } => {
            if timeout.is_some() {
                runner.run_timeout_secs = timeout;
            }
            runner.validate()?;
            let executor = Executor::new().with_runner_config(runner);
            let pipeline = find(&file, &name)?;

            let result = executor.execute_with_cancel(pipeline, cancel_on_ctrl_c()).await;
            report(std::slice::from_ref(&result), json)?;
            if result.is_failure() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::RunAll { timeout, json } => {
            if timeout.is_some() {
                runner.run_timeout_secs = timeout;
            }
            runner.validate()?;
            let executor = Executor::new().with_runner_config(runner);
            let enabled: Vec<PipelineDefinition> =
                file.pipelines.iter().filter(|p| p.enabled).cloned().collect();
            info!("Running {} of {} pipelines", enabled.len(), file.pipelines.len());

            let results = executor
                .execute_all_with_cancel(&enabled, cancel_on_ctrl_c())
                .await;
            report(&results, json)?;
            if results.iter().any(PipelineResult::is_failure) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal (Ctrl+C), cancelling in-flight runs");
            trigger.cancel();
        }
    });
    cancel
}

fn find<'a>(file: &'a PipelineFile, name: &str) -> anyhow::Result<&'a PipelineDefinition> {
    file.find(name)
        .ok_or_else(|| anyhow!("Pipeline {} is not defined", name))
}

fn list(file: &PipelineFile) {
    if file.pipelines.is_empty() {
        println!("No pipelines configured");
        return;
    }
    for pipeline in &file.pipelines {
        let transformer = pipeline
            .transformer
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or("-");
        println!(
            "{:<24} {:<9} connector={} transformer={} sinks={}",
            pipeline.name,
            if pipeline.enabled { "enabled" } else { "disabled" },
            pipeline.connector.kind,
            transformer,
            pipeline.sink_identities().join(",")
        );
        if let Some(description) = &pipeline.description {
            println!("    {}", description);
        }
    }
}

fn validate(file: &PipelineFile, path: &std::path::Path) -> anyhow::Result<()> {
    file.validate()?;

    let registry = ComponentRegistry::with_builtins();
    let mut problems = Vec::new();

    for pipeline in &file.pipelines {
        if let Err(e) = ResilienceConfig::split(&pipeline.connector.config) {
            problems.push(format!("{}: {}", pipeline.name, e));
        }
        if !registry.connector_types().contains(&pipeline.connector.kind.as_str()) {
            problems.push(format!("{}: unknown connector type {}", pipeline.name, pipeline.connector.kind));
        }
        if let Some(transformer) = &pipeline.transformer {
            if !registry.transformer_types().contains(&transformer.kind.as_str()) {
                problems.push(format!("{}: unknown transformer type {}", pipeline.name, transformer.kind));
            }
        }
        for sink in &pipeline.sinks {
            if !registry.sink_types().contains(&sink.kind.as_str()) {
                problems.push(format!("{}: unknown sink type {}", pipeline.name, sink.kind));
            }
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            error!("{}", problem);
        }
        bail!("{} has {} invalid entries", path.display(), problems.len());
    }

    println!("{}: {} pipelines valid", path.display(), file.pipelines.len());
    Ok(())
}

fn report(results: &[PipelineResult], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    for result in results {
        let mut line = format!(
            "{} [{}] status={} duration={:?}",
            result.pipeline, result.run_id, result.status, result.duration
        );
        if result.disabled {
            line.push_str(" (disabled)");
        }
        if result.filtered {
            line.push_str(" (record filtered, nothing written)");
        }
        if let Some(fetch) = &result.fetch {
            line.push_str(&format!(
                " attempts={} cached={}",
                fetch.attempts, fetch.from_cache
            ));
        }
        println!("{}", line);

        for (sink, outcome) in &result.sink_results {
            match &outcome.error {
                Some(error) => println!("  {} ({}): {:?} - {}", sink, outcome.sink_type, outcome.status, error),
                None => println!("  {} ({}): {:?}", sink, outcome.sink_type, outcome.status),
            }
        }
        if let Some(error) = &result.error {
            println!("  error: {}", error);
        }
    }
    Ok(())
}
