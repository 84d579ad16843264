use crate::aggregator::{EquivalenceFn, ResultAggregator};
use crate::config::SupervisorConfig;
use crate::graph::DependencyGraph;
use crate::registry::AgentRegistry;
use crate::scheduler::Scheduler;
use crate::stats::{ExecutionStats, StatsCollector};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use taskweave_core::{
    AggregationStrategy, Decomposer, DecompositionConstraints, SubTaskResult, Synthesizer,
    TaskweaveError,
};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Stage of the most recent [`Supervisor::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    Idle,
    Decomposing,
    GraphBuilding,
    Scheduling,
    Aggregating,
    Done,
    Failed,
}

impl std::fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Decomposing => "decomposing",
            Self::GraphBuilding => "graph_building",
            Self::Scheduling => "scheduling",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The aggregated output.
    pub output: Value,
    pub stats: ExecutionStats,
    /// One result per sub-task, in decomposition order.
    pub results: Vec<SubTaskResult>,
    /// The strategy that produced `output`.
    pub strategy: AggregationStrategy,
}

/// A failed run, with whatever had been recorded before the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    #[source]
    pub error: TaskweaveError,
    pub stats: ExecutionStats,
    pub partial_results: Vec<SubTaskResult>,
}

type StageFailure = (TaskweaveError, Vec<SubTaskResult>);

/// Runs a goal through decomposition, scheduling and aggregation.
///
/// Pipeline: Decomposing → GraphBuilding → Scheduling → Aggregating → Done.
/// Any stage failure moves straight to Failed. Each call gets its own
/// [`StatsCollector`].
///
/// Runs on one supervisor are serialized, so the phase channel always
/// describes a single run. Use separate supervisors to run goals in parallel.
pub struct Supervisor {
    decomposer: Arc<dyn Decomposer>,
    registry: Arc<AgentRegistry>,
    aggregator: ResultAggregator,
    phase: watch::Sender<SupervisorPhase>,
    run_lock: Mutex<()>,
}

impl Supervisor {
    pub fn new(decomposer: Arc<dyn Decomposer>, registry: AgentRegistry) -> Self {
        let (phase, _) = watch::channel(SupervisorPhase::Idle);
        Self {
            decomposer,
            registry: Arc::new(registry),
            aggregator: ResultAggregator::new(),
            phase,
            run_lock: Mutex::new(()),
        }
    }

    /// Synthesizer used by hierarchy aggregation and the consensus fallback.
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.aggregator = self.aggregator.with_synthesizer(synthesizer);
        self
    }

    /// Equivalence used to group outputs under consensus aggregation.
    pub fn with_equivalence(mut self, equivalence: EquivalenceFn) -> Self {
        self.aggregator = self.aggregator.with_equivalence(equivalence);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Current phase.
    pub fn phase(&self) -> SupervisorPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<SupervisorPhase> {
        self.phase.subscribe()
    }

    /// Run `goal` to completion. Waits for any run already in progress on
    /// this supervisor to finish first.
    ///
    /// # Errors
    /// Returns an [`ExecutionFailure`] carrying the first fatal error plus the
    /// stats and results accumulated up to that point. Graph errors surface
    /// before any agent is invoked.
    #[tracing::instrument(skip_all, fields(goal = %goal))]
    pub async fn execute(
        &self,
        goal: &str,
        config: &SupervisorConfig,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecutionFailure> {
        let _turn = self.run_lock.lock().await;
        let start = Instant::now();
        let stats = StatsCollector::new();

        info!("Supervisor: starting run");
        let outcome = self.run_pipeline(goal, config, cancel, &stats).await;
        stats.set_total_duration(start.elapsed());

        match outcome {
            Ok((output, results, strategy)) => {
                self.transition(SupervisorPhase::Done);
                let stats = stats.snapshot();
                info!(
                    duration_ms = stats.total_duration_ms,
                    succeeded = stats.succeeded_tasks,
                    failed = stats.failed_tasks,
                    strategy = %strategy,
                    "Supervisor: run complete"
                );
                Ok(ExecutionOutcome {
                    output,
                    stats,
                    results,
                    strategy,
                })
            }
            Err((error, partial_results)) => {
                self.transition(SupervisorPhase::Failed);
                error!(error = %error, recorded = partial_results.len(), "Supervisor: run failed");
                Err(ExecutionFailure {
                    error,
                    stats: stats.snapshot(),
                    partial_results,
                })
            }
        }
    }

    async fn run_pipeline(
        &self,
        goal: &str,
        config: &SupervisorConfig,
        cancel: &CancellationToken,
        stats: &StatsCollector,
    ) -> Result<(Value, Vec<SubTaskResult>, AggregationStrategy), StageFailure> {
        config.validate().map_err(fatal)?;

        self.transition(SupervisorPhase::Decomposing);
        let constraints = DecompositionConstraints {
            available_agents: self.registry.names(),
            strategy: config.aggregation_strategy,
        };
        let decomposed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(fatal(TaskweaveError::Cancelled)),
            decomposed = self.decomposer.decompose(goal, &constraints) => decomposed.map_err(fatal)?,
        };
        let subtasks = decomposed.subtasks;
        info!(subtasks = subtasks.len(), "Supervisor: decomposition complete");

        self.transition(SupervisorPhase::GraphBuilding);
        let graph = DependencyGraph::build(&subtasks).map_err(fatal)?;
        if config.validate_agents {
            self.registry.validate(&subtasks).map_err(fatal)?;
        }
        stats.set_total_tasks(subtasks.len());
        info!(layers = ?graph.layer_ids(), "Supervisor: dependency graph built");

        self.transition(SupervisorPhase::Scheduling);
        let scheduler = Scheduler::from_config(Arc::clone(&self.registry), config);
        let results = scheduler
            .execute_layers(&graph, &subtasks, cancel, stats)
            .await
            .map_err(|interrupted| (interrupted.error, interrupted.partial))?;
        if results.len() != subtasks.len() {
            let error = TaskweaveError::Orchestrator(format!(
                "Expected {} results, scheduler returned {}",
                subtasks.len(),
                results.len()
            ));
            return Err((error, results));
        }

        self.transition(SupervisorPhase::Aggregating);
        let strategy = config
            .aggregation_strategy
            .unwrap_or(decomposed.suggested_strategy);
        let ordered: Vec<SubTaskResult> = graph
            .execution_order()
            .into_iter()
            .map(|idx| results[idx].clone())
            .collect();
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TaskweaveError::Cancelled),
            output = self.aggregator.aggregate(goal, strategy, &ordered) => output,
        };
        match output {
            Ok(output) => Ok((output, results, strategy)),
            Err(error) => Err((error, results)),
        }
    }

    fn transition(&self, next: SupervisorPhase) {
        let previous = self.phase.send_replace(next);
        info!(from = %previous, to = %next, "Supervisor: phase transition");
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("registry", &self.registry)
            .field("aggregator", &self.aggregator)
            .field("phase", &self.phase())
            .finish()
    }
}

fn fatal(error: TaskweaveError) -> StageFailure {
    (error, Vec::new())
}
