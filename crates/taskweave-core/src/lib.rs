//! Core types and error definitions for the Taskweave scheduler.
//!
//! This crate provides the foundational types shared by the orchestrator and
//! its callers: the error taxonomy, the sub-task data model, and the external
//! capabilities the scheduler consumes.
//!
//! # Main types
//!
//! - [`TaskweaveError`] - Unified error enum for graph building, execution and aggregation.
//! - [`TaskweaveResult`] - Convenience alias for `Result<T, TaskweaveError>`.
//! - [`SubTask`] - One unit of work produced by a [`Decomposer`].
//! - [`SubTaskResult`] - The terminal outcome recorded for a [`SubTask`].
//! - [`DecomposedTask`] - A goal broken into sub-tasks plus a suggested strategy.
//! - [`Decomposer`], [`AgentInvoker`], [`Synthesizer`] - Capabilities implemented outside this workspace.

/// External capabilities consumed by the scheduler.
pub mod capability;
/// Sub-task data model.
pub mod task;

pub use capability::{AgentInvoker, DecompositionConstraints, Decomposer, SynthesisInput, Synthesizer};
pub use task::{
    AgentOutput, AggregationStrategy, DecomposedTask, SubTask, SubTaskResult, TokenUsage,
};

use std::time::Duration;

// --- Error types ---

/// Top-level error type for the Taskweave scheduler.
///
/// Graph-construction variants are fatal and surface before any task runs.
/// Per-task variants are recorded into [`SubTaskResult::error`] instead of
/// being returned.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskweaveError {
    /// The dependency relation contains at least one cycle.
    #[error("Cyclic dependency among tasks: {}", .task_ids.join(", "))]
    CyclicDependency {
        /// Tasks that could never be placed into a layer.
        task_ids: Vec<String>,
    },

    /// A task declares a dependency on an ID that is not part of the batch.
    #[error("Task '{task_id}' depends on unknown task '{missing}'")]
    UnknownTaskReference {
        /// The task declaring the dependency.
        task_id: String,
        /// The unresolved dependency ID.
        missing: String,
    },

    /// Two sub-tasks in one batch share an ID.
    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    /// No agent is registered under the name a task asks for.
    #[error("Task '{task_id}' references unknown agent '{agent}'")]
    UnknownAgent {
        /// The task naming the agent.
        task_id: String,
        /// The agent name that failed to resolve.
        agent: String,
    },

    /// A task failed on every attempt.
    #[error("Task '{task_id}' failed after {attempts} attempt(s): {cause}")]
    TaskExecution {
        /// The failed task.
        task_id: String,
        /// Number of invocations made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        cause: Box<TaskweaveError>,
    },

    /// A task was not run because one of its dependencies did not succeed.
    #[error("Task '{task_id}' skipped, failed dependencies: {}", .failed_dependencies.join(", "))]
    DependencySkipped {
        /// The skipped task.
        task_id: String,
        /// Dependencies without a successful result.
        failed_dependencies: Vec<String>,
    },

    /// Scheduling stopped because a dependency failed under the abort policy.
    #[error("Run aborted at task '{task_id}', failed dependencies: {}", .failed_dependencies.join(", "))]
    Aborted {
        /// The first task found with a failed dependency.
        task_id: String,
        /// Dependencies without a successful result.
        failed_dependencies: Vec<String>,
    },

    /// The execution context was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    /// A single agent attempt exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The aggregation stage failed.
    #[error("Aggregation error: {0}")]
    Aggregation(#[source] Box<TaskweaveError>),

    /// There was nothing successful to aggregate.
    #[error("No successful results to aggregate")]
    NoSuccessfulResults,

    /// An error returned by an agent invocation.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error returned by the decomposer.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// An error returned by the synthesizer.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The unit of concurrency running a task panicked.
    #[error("Task '{task_id}' panicked")]
    TaskPanicked {
        /// The task whose unit panicked.
        task_id: String,
    },

    /// An internal orchestration invariant did not hold.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),
}

impl TaskweaveError {
    /// Wrap the last attempt's error once retries are exhausted.
    pub fn task_execution(task_id: impl Into<String>, attempts: u32, cause: TaskweaveError) -> Self {
        Self::TaskExecution {
            task_id: task_id.into(),
            attempts,
            cause: Box::new(cause),
        }
    }

    /// Wrap an error raised while aggregating results.
    pub fn aggregation(cause: TaskweaveError) -> Self {
        match cause {
            already @ Self::Aggregation(_) => already,
            other => Self::Aggregation(Box::new(other)),
        }
    }

    /// Whether this error is, or wraps, a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::TaskExecution { cause, .. } | Self::Aggregation(cause) => cause.is_cancelled(),
            _ => false,
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Cancellation and configuration-class errors are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled
                | Self::Config(_)
                | Self::UnknownAgent { .. }
                | Self::CyclicDependency { .. }
                | Self::UnknownTaskReference { .. }
                | Self::DuplicateTaskId(_)
        )
    }
}

/// A convenience `Result` alias using [`TaskweaveError`].
pub type TaskweaveResult<T> = Result<T, TaskweaveError>;
