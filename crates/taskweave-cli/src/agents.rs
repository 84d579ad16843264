use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use taskweave_core::{
    AgentInvoker, AgentOutput, DecomposedTask, Decomposer, DecompositionConstraints,
    SynthesisInput, Synthesizer, TaskweaveError, TaskweaveResult,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

const MAX_STDERR_CHARS: usize = 2_000;

/// An agent that runs a shell command per invocation.
///
/// The task description is exported as `TASKWEAVE_DESCRIPTION` and the task
/// input is written to stdin as JSON. Stdout becomes the output, parsed as
/// JSON when it is valid JSON and kept as a string otherwise. A non-zero exit
/// status is an agent error.
#[derive(Debug, Clone)]
pub struct ShellAgent {
    name: String,
    command: String,
}

impl ShellAgent {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl AgentInvoker for ShellAgent {
    async fn invoke(&self, description: &str, input: &Value) -> TaskweaveResult<AgentOutput> {
        info!(agent = %self.name, command = %self.command, "Executing agent command");

        let payload = serde_json::to_vec(input)
            .map_err(|e| TaskweaveError::Agent(format!("Failed to encode input: {e}")))?;

        // Dropping the future (timeout, cancellation) kills the child.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("TASKWEAVE_DESCRIPTION", description)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TaskweaveError::Agent(format!("Failed to start agent '{}': {e}", self.name))
            })?;

        // Feed stdin while stdout is drained, so commands that echo their input
        // cannot fill both pipes and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        // Commands that ignore stdin may exit before reading it.
        if let Err(e) = fed {
            debug!(agent = %self.name, error = %e, "Agent did not read its input");
        }
        let output = output.map_err(|e| {
            TaskweaveError::Agent(format!("Failed to wait for agent '{}': {e}", self.name))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            warn!(agent = %self.name, exit_code = code, "Agent command failed");
            return Err(TaskweaveError::Agent(format!(
                "Agent '{}' exited with status {code}: {}",
                self.name,
                truncate(stderr.trim(), MAX_STDERR_CHARS)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(AgentOutput::new(parse_output(stdout.trim())))
    }
}

fn parse_output(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}... [truncated]", &s[..end]),
        None => s.to_string(),
    }
}

/// Returns a fixed decomposition read from a plan file.
#[derive(Debug, Clone)]
pub struct PlanDecomposer {
    plan: DecomposedTask,
}

impl PlanDecomposer {
    pub fn new(plan: DecomposedTask) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Decomposer for PlanDecomposer {
    async fn decompose(
        &self,
        goal: &str,
        constraints: &DecompositionConstraints,
    ) -> TaskweaveResult<DecomposedTask> {
        if self.plan.subtasks.is_empty() {
            return Err(TaskweaveError::Decomposition(format!(
                "Plan for '{goal}' has no tasks"
            )));
        }
        debug!(
            tasks = self.plan.subtasks.len(),
            agents = ?constraints.available_agents,
            "Using static plan"
        );
        Ok(self.plan.clone())
    }
}

/// Joins successful outputs into an array, in the order received.
///
/// When consensus groups are supplied each entry also carries the index of
/// its group.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinSynthesizer;

#[async_trait]
impl Synthesizer for JoinSynthesizer {
    async fn synthesize(&self, input: SynthesisInput<'_>) -> TaskweaveResult<Value> {
        let group_of = |task_id: &str| {
            input
                .groups
                .iter()
                .position(|group| group.iter().any(|id| id == task_id))
        };

        let joined: Vec<Value> = input
            .results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| match group_of(&r.task_id) {
                Some(group) => json!({ "task_id": r.task_id, "output": r.output, "group": group }),
                None => json!({ "task_id": r.task_id, "output": r.output }),
            })
            .collect();

        if joined.is_empty() {
            return Err(TaskweaveError::NoSuccessfulResults);
        }
        Ok(Value::Array(joined))
    }
}
