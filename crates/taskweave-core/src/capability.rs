//! Capabilities the scheduler consumes but does not implement.
//!
//! Decomposition, per-agent execution and synthesis are typically LLM-backed
//! and live outside this workspace. Cancellation reaches them by dropping the
//! returned future, so implementations should keep no state that a dropped
//! future would leave inconsistent.

use crate::{AgentOutput, AggregationStrategy, DecomposedTask, SubTaskResult, TaskweaveResult};
use async_trait::async_trait;
use serde_json::Value;

/// Hints passed to the decomposer along with the goal.
#[derive(Debug, Clone, Default)]
pub struct DecompositionConstraints {
    /// Agent names registered with the supervisor.
    pub available_agents: Vec<String>,
    /// Strategy the caller intends to use, if already fixed.
    pub strategy: Option<AggregationStrategy>,
}

/// Breaks a goal into sub-tasks with declared dependencies.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(
        &self,
        goal: &str,
        constraints: &DecompositionConstraints,
    ) -> TaskweaveResult<DecomposedTask>;
}

/// Carries out a sub-task on behalf of one named agent.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, description: &str, input: &Value) -> TaskweaveResult<AgentOutput>;
}

/// What a [`Synthesizer`] receives.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub goal: &'a str,
    /// Results ordered layer by layer, then by input order within a layer.
    pub results: &'a [SubTaskResult],
    /// Consensus groups as lists of task IDs. Empty for hierarchy aggregation.
    pub groups: &'a [Vec<String>],
}

/// Produces one output from many sub-task results.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, input: SynthesisInput<'_>) -> TaskweaveResult<Value>;
}
