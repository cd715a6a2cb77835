//! Runs one durapipe orchestration against the scripted in-process worker.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use durapipe::observability::{init_tracing, LogFormat};
use durapipe::prelude::*;
use durapipe::testing::ScriptedWorker;

/// Watch a pipeline variant run end to end.
#[derive(Debug, Parser)]
#[command(name = "durapipe-demo", version, about)]
struct Cli {
    /// Declared orchestration type name.
    #[arg(long, default_value = "DataPipelineWorkflowHappyPath")]
    variant: String,

    /// Input file identifier.
    #[arg(long, default_value = "customers.csv")]
    file: String,

    /// Validation policy value ("blue" is always rejected).
    #[arg(long, default_value = "green")]
    validation: String,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Deliver the load-complete signal or update after this many seconds.
    #[arg(long)]
    confirm_after_secs: Option<u64>,

    /// Per-stage work time of the scripted worker, in seconds.
    #[arg(long, default_value_t = 1)]
    stage_secs: u64,

    /// Log output format (pretty or json).
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Print the known variant names and exit.
    #[arg(long)]
    list_variants: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if cli.list_variants {
        for variant in ScenarioVariant::ALL {
            println!("{variant}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &cli.config {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    let worker = Arc::new(ScriptedWorker::new().with_stage_delay(Duration::from_secs(cli.stage_secs)));
    let engine = Arc::new(
        OrchestrationEngine::new(worker)
            .with_config(config)
            .with_event_sink(Arc::new(LoggingEventSink::debug())),
    );

    let variant = ScenarioVariant::resolve(&cli.variant)?;
    let handle = engine
        .start(PipelineRequest::new(&cli.file, &cli.validation), &cli.variant)
        .context("starting orchestration")?;
    let id = handle.id();
    info!(instance_id = %id, variant = %variant, "Started demo run");

    if let Some(delay) = cli.confirm_after_secs {
        let engine = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            let delivered = if variant == ScenarioVariant::HumanUpdate {
                engine
                    .update_load_complete(id, "load complete")
                    .map(|ack| info!(ack = %ack, "Update acknowledged"))
            } else {
                engine
                    .signal_load_complete(id, "load complete")
                    .map(|()| info!("Signal delivered"))
            };
            if let Err(err) = delivered {
                warn!(error = %err, "Confirmation not delivered");
            }
        });
    }

    let mut last_progress = None;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let result = loop {
        let progress = engine.progress(id)?;
        if last_progress != Some(progress) {
            println!("progress: {progress}%");
            last_progress = Some(progress);
        }
        if let Some(result) = handle.try_result() {
            break result;
        }
        ticker.tick().await;
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("{result}");

    Ok(if result.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
