use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use genflow::config::MAX_JOB_DEADLINE;
use genflow::{
    capability_summaries, headers_with_token, parse_args_json, render_progress, GenFlowConfig,
    LoggingConfig, RecordingProgress, ToolOrchestrator, WaitOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "genflow", version, about = "GenFlow generation pipeline CLI", author)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出所有内置能力
    List {
        #[arg(long)]
        json: bool,
    },
    /// 执行一次能力调用并打印结果信封
    Run {
        name: String,
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long, env = "GENFLOW_TOKEN")]
        token: String,
        #[arg(long)]
        deadline_secs: Option<u64>,
        #[arg(long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    LoggingConfig::init();

    let cli = Cli::parse();
    match cli.command {
        Command::List { json } => handle_list(json)?,
        Command::Run {
            name,
            args,
            token,
            deadline_secs,
            verbose,
        } => handle_run(name, args, token, deadline_secs, verbose).await?,
    }
    Ok(())
}

fn handle_list(json: bool) -> anyhow::Result<()> {
    let registry = genflow::CapabilityRegistry::with_builtins();
    let summaries = capability_summaries(&registry);
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    println!("{:<26} {:<38} {}", "Name", "Job type", "Description");
    for summary in summaries {
        println!(
            "{:<26} {:<38} {}",
            summary.name, summary.job_type, summary.description
        );
    }
    Ok(())
}

async fn handle_run(
    name: String,
    args: String,
    token: String,
    deadline_secs: Option<u64>,
    verbose: bool,
) -> anyhow::Result<()> {
    let config = GenFlowConfig::from_env().context("failed to load configuration")?;
    if config.provider_key.is_empty() {
        anyhow::bail!("FAL_KEY must be set to run a capability");
    }

    let args = parse_args_json(&args)?;
    let headers = headers_with_token(&token)?;

    let mut wait = WaitOptions::from_config(&config);
    if let Some(secs) = deadline_secs {
        let deadline = Duration::from_secs(secs);
        if deadline.is_zero() || deadline > MAX_JOB_DEADLINE {
            anyhow::bail!(
                "--deadline-secs must be between 1 and {}",
                MAX_JOB_DEADLINE.as_secs()
            );
        }
        wait = wait.with_deadline(deadline);
    }

    let recorder = RecordingProgress::new();
    let mut orchestrator = ToolOrchestrator::from_config(&config)?.with_wait_options(wait);
    if verbose {
        orchestrator = orchestrator.with_progress(Arc::new(recorder.clone()));
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, cancelling invocation");
            signal_token.cancel();
        }
    });

    let envelope = orchestrator.invoke(&name, &headers, args, &cancel).await;

    if verbose {
        for line in render_progress(&recorder.events()) {
            eprintln!("{line}");
        }
    }
    println!("{}", serde_json::to_string_pretty(&envelope.to_json())?);

    if !envelope.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
