use crate::TaskweaveError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::AddAssign;
use std::str::FromStr;
use std::time::Duration;

/// How completed sub-task results are merged into one output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// Key every successful output by its task.
    #[default]
    Parallel,
    /// Hand all results, in execution order, to a synthesizer once.
    Hierarchy,
    /// Pick the output most tasks agree on.
    Consensus,
}

impl std::fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationStrategy::Parallel => write!(f, "parallel"),
            AggregationStrategy::Hierarchy => write!(f, "hierarchy"),
            AggregationStrategy::Consensus => write!(f, "consensus"),
        }
    }
}

impl FromStr for AggregationStrategy {
    type Err = TaskweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(AggregationStrategy::Parallel),
            "hierarchy" | "hierarchical" => Ok(AggregationStrategy::Hierarchy),
            "consensus" => Ok(AggregationStrategy::Consensus),
            other => Err(TaskweaveError::Config(format!(
                "Unknown aggregation strategy '{other}'"
            ))),
        }
    }
}

/// A unit of work produced by the decomposer. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub description: String,
    /// Key into the agent registry.
    #[serde(rename = "agent")]
    pub agent_name: String,
    /// IDs of tasks in the same batch that must reach a terminal result first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Opaque payload passed to the agent.
    #[serde(default)]
    pub input: Value,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            agent_name: agent_name.into(),
            dependencies: Vec::new(),
            input: Value::Null,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// Token counters reported by an agent. Defaults to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// What an agent returns from a single successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub output: Value,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl AgentOutput {
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// The terminal outcome of one [`SubTask`].
///
/// Exactly one result exists per sub-task after a completed run. Retries do
/// not produce extra results; they only raise `attempts`.
#[derive(Debug, Clone)]
pub struct SubTaskResult {
    pub task_id: String,
    pub agent_name: String,
    /// `Value::Null` when the task did not succeed.
    pub output: Value,
    /// Set only for terminal failures.
    pub error: Option<TaskweaveError>,
    pub attempts: u32,
    pub duration: Duration,
    pub usage: TokenUsage,
}

impl SubTaskResult {
    pub fn success(task: &SubTask, output: Value, attempts: u32, duration: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_name: task.agent_name.clone(),
            output,
            error: None,
            attempts,
            duration,
            usage: TokenUsage::default(),
        }
    }

    pub fn failure(task: &SubTask, error: TaskweaveError, attempts: u32, duration: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_name: task.agent_name.clone(),
            output: Value::Null,
            error: Some(error),
            attempts,
            duration,
            usage: TokenUsage::default(),
        }
    }

    /// A result for a task that was never handed to its agent.
    pub fn skipped(task: &SubTask, failed_dependencies: Vec<String>) -> Self {
        Self::failure(
            task,
            TaskweaveError::DependencySkipped {
                task_id: task.id.clone(),
                failed_dependencies,
            },
            0,
            Duration::ZERO,
        )
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.error, Some(TaskweaveError::DependencySkipped { .. }))
    }
}

/// A goal broken into sub-tasks by the decomposer. Read-only to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposedTask {
    pub original_goal: String,
    pub subtasks: Vec<SubTask>,
    #[serde(default)]
    pub suggested_strategy: AggregationStrategy,
}

impl DecomposedTask {
    pub fn new(original_goal: impl Into<String>, subtasks: Vec<SubTask>) -> Self {
        Self {
            original_goal: original_goal.into(),
            subtasks,
            suggested_strategy: AggregationStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.suggested_strategy = strategy;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subtask_builder() {
        let task = SubTask::new("b", "Summarize", "writer")
            .with_dependencies(["a"])
            .with_input(json!({"lang": "en"}));
        assert_eq!(task.dependencies, vec!["a".to_string()]);
        assert_eq!(task.input["lang"], "en");
    }

    #[test]
    fn test_subtask_deserializes_with_defaults() {
        let task: SubTask =
            serde_json::from_str(r#"{"id":"a","description":"d","agent":"w"}"#).unwrap();
        assert_eq!(task.agent_name, "w");
        assert!(task.dependencies.is_empty());
        assert!(task.input.is_null());
    }

    #[test]
    fn test_token_usage_accumulates() {
        let mut usage = TokenUsage::new(10, 5);
        usage += TokenUsage::new(1, 2);
        assert_eq!(usage, TokenUsage::new(11, 7));
        assert_eq!(usage.total_tokens, 18);
        assert!(TokenUsage::default().is_zero());
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!(
            "Hierarchical".parse::<AggregationStrategy>().unwrap(),
            AggregationStrategy::Hierarchy
        );
        assert_eq!(AggregationStrategy::Consensus.to_string(), "consensus");
        assert!("vote".parse::<AggregationStrategy>().is_err());
    }

    #[test]
    fn test_skipped_result() {
        let task = SubTask::new("b", "d", "w");
        let result = SubTaskResult::skipped(&task, vec!["a".into()]);
        assert!(result.is_skipped());
        assert!(!result.is_success());
        assert_eq!(result.attempts, 0);
        assert!(result.output.is_null());
    }
}
