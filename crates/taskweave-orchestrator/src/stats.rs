use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use taskweave_core::{SubTaskResult, TokenUsage};

/// Counters for one agent across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Agent invocations, retries included.
    pub invocations: u64,
    /// Terminal results produced by this agent.
    pub tasks: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
    pub tokens: TokenUsage,
}

impl AgentStats {
    /// Mean wall time per task, in milliseconds.
    pub fn average_duration_ms(&self) -> u64 {
        if self.tasks == 0 {
            0
        } else {
            self.total_duration_ms / self.tasks
        }
    }
}

/// Aggregate counters for one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_tasks: usize,
    pub succeeded_tasks: usize,
    /// Includes skipped tasks.
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub total_attempts: u64,
    /// Wall time of the whole run.
    pub total_duration_ms: u64,
    pub tokens: TokenUsage,
    pub per_agent: BTreeMap<String, AgentStats>,
}

impl ExecutionStats {
    /// Results recorded so far.
    pub fn recorded_tasks(&self) -> usize {
        self.succeeded_tasks + self.failed_tasks
    }
}

/// Collects [`ExecutionStats`] while a run is in flight.
///
/// One collector belongs to one run. Writes are serialized by a lock owned by
/// the instance, so counters are exact regardless of how many units report.
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: Mutex<ExecutionStats>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of tasks the run is expected to produce results for.
    pub fn set_total_tasks(&self, total: usize) {
        self.stats.lock().total_tasks = total;
    }

    pub fn set_total_duration(&self, duration: Duration) {
        self.stats.lock().total_duration_ms = duration_ms(duration);
    }

    /// Fold one terminal result into the counters. Call once per result.
    pub fn record(&self, result: &SubTaskResult) {
        let mut stats = self.stats.lock();

        if result.is_success() {
            stats.succeeded_tasks += 1;
        } else {
            stats.failed_tasks += 1;
        }
        stats.total_attempts += u64::from(result.attempts);
        stats.tokens += result.usage;

        if result.is_skipped() {
            stats.skipped_tasks += 1;
            return;
        }

        let agent = stats.per_agent.entry(result.agent_name.clone()).or_default();
        agent.invocations += u64::from(result.attempts);
        agent.tasks += 1;
        if result.is_success() {
            agent.succeeded += 1;
        } else {
            agent.failed += 1;
        }
        agent.total_duration_ms += duration_ms(result.duration);
        agent.tokens += result.usage;
    }

    /// A consistent copy of the current counters.
    pub fn snapshot(&self) -> ExecutionStats {
        self.stats.lock().clone()
    }

    /// Serialize the current counters as JSON, with per-agent averages.
    pub fn to_json(&self) -> serde_json::Value {
        let stats = self.snapshot();
        let averages: BTreeMap<&str, u64> = stats
            .per_agent
            .iter()
            .map(|(name, agent)| (name.as_str(), agent.average_duration_ms()))
            .collect();
        serde_json::json!({
            "stats": stats,
            "average_duration_ms": averages,
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
