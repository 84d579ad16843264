mod agents;
mod plan;

use agents::{JoinSynthesizer, PlanDecomposer};
use clap::{Parser, Subcommand};
use plan::Plan;
use std::path::PathBuf;
use std::sync::Arc;
use taskweave_core::AggregationStrategy;
use taskweave_orchestrator::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskweave", about = "Taskweave: dependency-aware multi-agent task scheduler")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan and print the aggregated output
    Run {
        /// Path to the plan file
        #[arg(short, long)]
        plan: PathBuf,
        /// Aggregation strategy (overrides the plan)
        #[arg(short, long)]
        strategy: Option<AggregationStrategy>,
    },
    /// Check a plan and print its execution layers
    Validate {
        /// Path to the plan file
        #[arg(short, long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Run { plan, strategy } => run(plan, strategy).await,
        Commands::Validate { plan } => validate(plan),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(path: PathBuf, strategy: Option<AggregationStrategy>) -> anyhow::Result<()> {
    let plan = Plan::load(&path)?;
    let mut config = plan.config.clone();
    if strategy.is_some() {
        config.aggregation_strategy = strategy;
    }

    let supervisor = Supervisor::new(
        Arc::new(PlanDecomposer::new(plan.decomposed())),
        plan.registry(),
    )
    .with_synthesizer(Arc::new(JoinSynthesizer));

    info!(
        plan = %path.display(),
        tasks = plan.tasks.len(),
        agents = supervisor.registry().len(),
        "Starting run"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    match supervisor.execute(&plan.goal, &config, &cancel).await {
        Ok(outcome) => {
            let report = serde_json::json!({
                "output": outcome.output,
                "strategy": outcome.strategy,
                "stats": outcome.stats,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(failure) => {
            let report = serde_json::json!({
                "error": failure.error.to_string(),
                "stats": failure.stats,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Err(failure.into())
        }
    }
}

fn validate(path: PathBuf) -> anyhow::Result<()> {
    let plan = Plan::load(&path)?;
    let graph = plan.validate()?;

    let report = serde_json::json!({
        "goal": plan.goal,
        "tasks": graph.len(),
        "layers": graph.layer_ids(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
