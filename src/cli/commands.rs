//! CLI command definitions for runforge.
//!
//! `run` executes a whole pipeline. `download` and `process` run a single
//! stage with the same parameter names as the pipeline configuration, and
//! `resolve` / `runs` inspect the metadata store after the fact.

use std::path::Path;

use clap::Parser;
use serde::Serialize;

use crate::artifacts::ArtifactInfo;
use crate::context::TrackingContext;
use crate::pipeline::{PipelineConfig, PipelineOrchestrator, PipelineReport, StageConfig};
use crate::stage::runner::lineage_tags;
use crate::stage::{StageParams, StageRecord};
use crate::tracking::Run;

/// Artifact lineage pipeline runner.
#[derive(Parser)]
#[command(name = "runforge")]
#[command(about = "Run tracked data pipelines and resolve artifacts by logical name")]
#[command(version)]
#[command(
    long_about = "runforge runs sequential data pipelines. Every stage is recorded as a run, its outputs are committed as immutable artifacts, and downstream stages find their inputs by logical name.\n\nExample usage:\n  runforge run --config pipeline.yaml\n  runforge resolve --experiment iris_pipeline --artifact clean_data.csv"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run every configured stage in order.
    Run(RunArgs),

    /// Download a file and register it as an artifact.
    Download(DownloadArgs),

    /// Project a resolved iris dataset and register the cleaned data.
    Process(ProcessArgs),

    /// Print the location of the latest artifact with a logical name.
    Resolve(ResolveArgs),

    /// List the runs of an experiment.
    Runs(RunsArgs),
}

/// Where to find configuration and which experiment to use.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Pipeline configuration file. Built-in defaults apply when absent.
    #[arg(short, long, env = "RUNFORGE_CONFIG")]
    pub config: Option<String>,

    /// Experiment name, overriding the configuration.
    #[arg(short, long)]
    pub experiment: Option<String>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Source URL for download stages, overriding the configuration.
    #[arg(long, alias = "file_url")]
    pub file_url: Option<String>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// URL (or local path) of the file to download.
    #[arg(long, alias = "file_url")]
    pub file_url: String,

    /// Name for the artifact.
    #[arg(long, alias = "artifact_name")]
    pub artifact_name: String,

    /// Type for the artifact.
    #[arg(long, alias = "artifact_type", default_value = "raw_data")]
    pub artifact_type: String,

    /// Description for the artifact.
    #[arg(long, alias = "artifact_description", default_value = "")]
    pub artifact_description: String,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Logical name of the input artifact.
    #[arg(long, alias = "input_artifact")]
    pub input_artifact: String,

    /// Name for the artifact.
    #[arg(long, alias = "artifact_name")]
    pub artifact_name: String,

    /// Type for the artifact.
    #[arg(long, alias = "artifact_type", default_value = "processed_data")]
    pub artifact_type: String,

    /// Description for the artifact.
    #[arg(long, alias = "artifact_description", default_value = "")]
    pub artifact_description: String,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Logical artifact name to resolve.
    #[arg(short, long)]
    pub artifact: String,
}

#[derive(Parser, Debug)]
pub struct RunsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Download(args) => run_download_command(args).await,
        Commands::Process(args) => run_process_command(args).await,
        Commands::Resolve(args) => run_resolve_command(args).await,
        Commands::Runs(args) => run_runs_command(args).await,
    }
}

async fn load_config(args: &StoreArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(Path::new(path)).await?,
        None => PipelineConfig::default().apply_env()?,
    };
    if let Some(name) = &args.experiment {
        config = config.with_experiment_name(name);
    }
    Ok(config)
}

// ============================================================================
// Pipeline Commands
// ============================================================================

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.store).await?;
    if let Some(url) = args.file_url {
        config = config.with_file_url(url);
    }
    execute(config, args.json).await
}

async fn run_download_command(args: DownloadArgs) -> anyhow::Result<()> {
    let params = StageParams::new(args.artifact_name, args.artifact_type)
        .with_description(args.artifact_description);
    let config = load_config(&args.store)
        .await?
        .with_stages(vec![StageConfig::download("download_data", args.file_url, params)]);
    execute(config, args.json).await
}

async fn run_process_command(args: ProcessArgs) -> anyhow::Result<()> {
    let params = StageParams::new(args.artifact_name, args.artifact_type)
        .with_input(args.input_artifact)
        .with_description(args.artifact_description);
    let config = load_config(&args.store)
        .await?
        .with_stages(vec![StageConfig::projection("process_data", params)]);
    execute(config, args.json).await
}

#[derive(Debug, Serialize)]
struct StageSummary<'a> {
    stage: &'a str,
    run_id: &'a str,
    status: String,
    artifact_name: Option<&'a str>,
    input_artifact: Option<&'a str>,
    input_run_id: Option<&'a str>,
    artifacts: &'a [crate::artifacts::CommittedArtifact],
}

#[derive(Debug, Serialize)]
struct PipelineSummary<'a> {
    experiment: &'a str,
    experiment_id: Option<&'a str>,
    status: String,
    states: Vec<String>,
    duration_ms: u64,
    stages: Vec<StageSummary<'a>>,
    error: Option<String>,
}

fn summarize(report: &PipelineReport) -> PipelineSummary<'_> {
    PipelineSummary {
        experiment: &report.experiment_name,
        experiment_id: report.experiment_id.as_deref(),
        status: report
            .final_state()
            .map(ToString::to_string)
            .unwrap_or_default(),
        states: report.states.iter().map(ToString::to_string).collect(),
        duration_ms: report.duration.as_millis() as u64,
        stages: report.stages.iter().map(stage_summary).collect(),
        error: report.error.as_ref().map(ToString::to_string),
    }
}

fn stage_summary(record: &StageRecord) -> StageSummary<'_> {
    StageSummary {
        stage: &record.stage_id,
        run_id: &record.run.run_id,
        status: record.run.status.to_string(),
        artifact_name: record.run.artifact_name(),
        input_artifact: record.input.as_ref().map(|i| i.logical_name.as_str()),
        input_run_id: record.input.as_ref().map(|i| i.run.run_id.as_str()),
        artifacts: &record.artifacts,
    }
}

/// Resolves on the first Ctrl-C. Never resolves if no handler can be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for interrupts");
        std::future::pending::<()>().await;
    }
}

async fn execute(config: PipelineConfig, json: bool) -> anyhow::Result<()> {
    let orchestrator = PipelineOrchestrator::open(config).await?;

    // The losing branch is dropped before its result is inspected, which
    // removes the stage's staging directory and any partial upload.
    let outcome = tokio::select! {
        report = orchestrator.run() => Some(report),
        _ = interrupted() => None,
    };
    let Some(report) = outcome else {
        match orchestrator.kill_active().await {
            Ok(Some(run_id)) => tracing::warn!(run_id = %run_id, "Pipeline interrupted"),
            Ok(None) => tracing::warn!("Pipeline interrupted between stages"),
            Err(e) => tracing::error!(error = %e, "Failed to mark interrupted run as killed"),
        }
        anyhow::bail!("Interrupted");
    };

    if json {
        let output = serde_json::to_string_pretty(&summarize(&report))
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", output);
    } else {
        for record in &report.stages {
            println!(
                "{:<16} {}  {}",
                record.stage_id,
                record.run.run_id,
                record
                    .primary_artifact()
                    .map(|a| a.uri.to_string())
                    .unwrap_or_default()
            );
        }
    }

    report.into_result()?;
    Ok(())
}

// ============================================================================
// Inspection Commands
// ============================================================================

async fn open_experiment(args: &StoreArgs) -> anyhow::Result<(TrackingContext, String)> {
    let config = load_config(args).await?;
    let ctx = TrackingContext::open(&config.storage).await?;
    let name = &config.main.experiment_name;
    let experiment = ctx
        .store
        .get_experiment_by_name(name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Experiment '{}' does not exist", name))?;
    Ok((ctx, experiment.experiment_id))
}

async fn run_resolve_command(args: ResolveArgs) -> anyhow::Result<()> {
    let (ctx, experiment_id) = open_experiment(&args.store).await?;
    let resolved = ctx.resolver().resolve(&experiment_id, &args.artifact).await?;
    println!("{}\t{}", resolved.uri, resolved.run.run_id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunListing {
    #[serde(flatten)]
    run: Run,
    artifacts: Vec<ArtifactInfo>,
}

async fn run_runs_command(args: RunsArgs) -> anyhow::Result<()> {
    let (ctx, experiment_id) = open_experiment(&args.store).await?;
    let runs = ctx.store.list_runs(&experiment_id).await?;

    if args.json {
        let mut listings = Vec::with_capacity(runs.len());
        for run in runs {
            let artifacts = ctx.artifacts.list(&run).await?;
            listings.push(RunListing { run, artifacts });
        }
        let output = serde_json::to_string_pretty(&listings)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", output);
        return Ok(());
    }

    for run in &runs {
        let tags = lineage_tags(run)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{}  {:<8}  {}  {}",
            run.run_id,
            run.status,
            run.started_at().format("%Y-%m-%d %H:%M:%S%.3f"),
            tags
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download_with_original_flag_names() {
        let cli = Cli::try_parse_from([
            "runforge",
            "download",
            "--file_url",
            "https://example.com/iris.csv",
            "--artifact_name",
            "iris.csv",
            "--artifact_type",
            "raw_data",
            "--artifact_description",
            "Input data",
        ])
        .unwrap();

        match cli.command {
            Commands::Download(args) => {
                assert_eq!(args.file_url, "https://example.com/iris.csv");
                assert_eq!(args.artifact_name, "iris.csv");
                assert_eq!(args.artifact_description, "Input data");
                assert!(args.store.config.is_none());
            }
            _ => panic!("expected download"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_resolve() {
        let cli = Cli::try_parse_from([
            "runforge",
            "--log-level",
            "debug",
            "resolve",
            "--experiment",
            "iris_pipeline",
            "--artifact",
            "clean_data.csv",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.store.experiment.as_deref(), Some("iris_pipeline"));
                assert_eq!(args.artifact, "clean_data.csv");
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_process_requires_input_artifact() {
        let result = Cli::try_parse_from([
            "runforge",
            "process",
            "--artifact-name",
            "clean_data.csv",
        ]);
        assert!(result.is_err());
    }
}
