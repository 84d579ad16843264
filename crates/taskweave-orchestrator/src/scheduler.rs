//! Layer-by-layer execution of a dependency graph.
//!
//! Members of a layer run concurrently, bounded by a [`ConcurrencyGate`].
//! A layer is a strict barrier: the next one starts only after every member
//! of the current one holds a terminal result.

use crate::config::{DependencyFailurePolicy, SupervisorConfig};
use crate::gate::ConcurrencyGate;
use crate::graph::DependencyGraph;
use crate::registry::AgentRegistry;
use crate::runner::TaskRunner;
use crate::stats::StatsCollector;
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::{SubTask, SubTaskResult, TaskweaveError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Scheduling stopped early. Carries the terminal results recorded so far,
/// in input order.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct Interrupted {
    #[source]
    pub error: TaskweaveError,
    pub partial: Vec<SubTaskResult>,
}

/// Drives a [`DependencyGraph`] to completion through a [`TaskRunner`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    runner: TaskRunner,
    gate: ConcurrencyGate,
    on_dependency_failure: DependencyFailurePolicy,
}

impl Scheduler {
    pub fn new(
        runner: TaskRunner,
        gate: ConcurrencyGate,
        on_dependency_failure: DependencyFailurePolicy,
    ) -> Self {
        Self {
            runner,
            gate,
            on_dependency_failure,
        }
    }

    pub fn from_config(registry: Arc<AgentRegistry>, config: &SupervisorConfig) -> Self {
        Self::new(
            TaskRunner::from_config(registry, config),
            ConcurrencyGate::new(config.max_concurrency),
            config.on_dependency_failure,
        )
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Execute every layer of `graph`, whose indices refer to `subtasks`.
    ///
    /// On completion returns one result per sub-task, in input order. Every
    /// terminal result is recorded into `stats` as soon as it is collected.
    /// Dropping the returned future aborts the units still running.
    ///
    /// # Errors
    /// [`Interrupted`] with [`TaskweaveError::Aborted`] when a dependency
    /// failed under [`DependencyFailurePolicy::Abort`], or with
    /// [`TaskweaveError::Cancelled`] when `cancel` fired.
    pub async fn execute_layers(
        &self,
        graph: &DependencyGraph,
        subtasks: &[SubTask],
        cancel: &CancellationToken,
        stats: &StatsCollector,
    ) -> Result<Vec<SubTaskResult>, Interrupted> {
        if graph.len() != subtasks.len() {
            return Err(Interrupted {
                error: TaskweaveError::Orchestrator(format!(
                    "Graph has {} tasks but {} sub-tasks were supplied",
                    graph.len(),
                    subtasks.len()
                )),
                partial: Vec::new(),
            });
        }

        // One slot per sub-task. Only this function writes to it, once per index.
        let mut slots: Vec<Option<SubTaskResult>> = vec![None; subtasks.len()];

        for (layer_no, layer) in graph.layers().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(layer = layer_no, "Execution cancelled before layer start");
                return Err(interrupted(TaskweaveError::Cancelled, slots));
            }

            let mut runnable = Vec::with_capacity(layer.len());
            let mut blocked = Vec::new();
            for &idx in layer {
                let failed: Vec<String> = graph
                    .dependencies_of(idx)
                    .iter()
                    .filter(|&&dep| !slots[dep].as_ref().is_some_and(SubTaskResult::is_success))
                    .map(|&dep| subtasks[dep].id.clone())
                    .collect();
                if failed.is_empty() {
                    runnable.push(idx);
                } else {
                    blocked.push((idx, failed));
                }
            }

            if self.on_dependency_failure == DependencyFailurePolicy::Abort {
                if let Some((idx, failed)) = blocked.into_iter().next() {
                    warn!(
                        layer = layer_no,
                        task_id = %subtasks[idx].id,
                        failed = ?failed,
                        "Dependency failed, aborting run"
                    );
                    let error = TaskweaveError::Aborted {
                        task_id: subtasks[idx].id.clone(),
                        failed_dependencies: failed,
                    };
                    return Err(interrupted(error, slots));
                }
            } else {
                for (idx, failed) in blocked {
                    warn!(
                        task_id = %subtasks[idx].id,
                        failed = ?failed,
                        "Dependency failed, skipping task"
                    );
                    let result = SubTaskResult::skipped(&subtasks[idx], failed);
                    stats.record(&result);
                    slots[idx] = Some(result);
                }
            }

            info!(
                layer = layer_no,
                running = runnable.len(),
                size = layer.len(),
                "Starting layer"
            );

            let mut units = LayerUnits(
                runnable
                    .into_iter()
                    .map(|idx| (idx, self.spawn_unit(subtasks[idx].clone(), cancel.clone())))
                    .collect(),
            );

            // Barrier: every unit of this layer reaches a terminal state here.
            // If this future is dropped first, `units` aborts whatever is left.
            for (idx, handle) in &mut units.0 {
                let idx = *idx;
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(task_id = %subtasks[idx].id, error = %e, "Task unit panicked");
                        let err = TaskweaveError::TaskPanicked {
                            task_id: subtasks[idx].id.clone(),
                        };
                        // How many attempts ran before the panic is unknown.
                        SubTaskResult::failure(&subtasks[idx], err, 0, Duration::ZERO)
                    }
                };
                stats.record(&result);
                slots[idx] = Some(result);
            }
            drop(units);

            if cancel.is_cancelled() {
                warn!(layer = layer_no, "Execution cancelled during layer");
                return Err(interrupted(TaskweaveError::Cancelled, slots));
            }
        }

        let missing = slots.iter().filter(|s| s.is_none()).count();
        if missing > 0 {
            return Err(interrupted(
                TaskweaveError::Orchestrator(format!("{missing} task(s) finished without a result")),
                slots,
            ));
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Acquire the gate, run the task, release the gate.
    fn spawn_unit(&self, task: SubTask, cancel: CancellationToken) -> JoinHandle<SubTaskResult> {
        let gate = self.gate.clone();
        let runner = self.runner.clone();
        tokio::spawn(async move {
            let _permit = match gate.acquire(&cancel).await {
                Ok(permit) => permit,
                Err(e) => return SubTaskResult::failure(&task, e, 0, Duration::ZERO),
            };
            runner.run(&task, &cancel).await
        })
    }
}

/// Spawned units of one layer, aborted on drop.
struct LayerUnits(Vec<(usize, JoinHandle<SubTaskResult>)>);

impl Drop for LayerUnits {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

fn interrupted(error: TaskweaveError, slots: Vec<Option<SubTaskResult>>) -> Interrupted {
    Interrupted {
        error,
        partial: slots.into_iter().flatten().collect(),
    }
}
