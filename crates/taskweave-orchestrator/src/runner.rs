use crate::config::{RetryPolicy, SupervisorConfig};
use crate::registry::AgentRegistry;
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::{SubTask, SubTaskResult, TaskweaveError, TokenUsage};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Executes one sub-task against its named agent with a per-attempt timeout
/// and exponential-backoff retries.
///
/// The runner never touches shared state: everything it learns goes into the
/// returned [`SubTaskResult`].
#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: Arc<AgentRegistry>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl TaskRunner {
    pub fn new(registry: Arc<AgentRegistry>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            registry,
            policy,
            timeout,
        }
    }

    pub fn from_config(registry: Arc<AgentRegistry>, config: &SupervisorConfig) -> Self {
        Self::new(registry, config.retry.clone(), config.task_timeout())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `task` until it succeeds, exhausts its attempt budget, hits a
    /// non-retryable error, or `cancel` fires.
    pub async fn run(&self, task: &SubTask, cancel: &CancellationToken) -> SubTaskResult {
        let start = Instant::now();

        let Some(agent) = self.registry.get(&task.agent_name) else {
            warn!(task_id = %task.id, agent = %task.agent_name, "No agent registered for task");
            let err = TaskweaveError::UnknownAgent {
                task_id: task.id.clone(),
                agent: task.agent_name.clone(),
            };
            return SubTaskResult::failure(task, err, 0, start.elapsed());
        };

        let max_attempts = self.policy.max_retries.max(1);
        let mut usage = TokenUsage::default();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TaskweaveError::Cancelled),
                res = tokio::time::timeout(self.timeout, agent.invoke(&task.description, &task.input)) => {
                    res.unwrap_or(Err(TaskweaveError::Timeout(self.timeout)))
                }
            };

            match outcome {
                Ok(out) => {
                    usage += out.usage;
                    info!(
                        task_id = %task.id,
                        agent = %task.agent_name,
                        attempt,
                        tokens = usage.total_tokens,
                        "Task completed"
                    );
                    return SubTaskResult::success(task, out.output, attempt, start.elapsed())
                        .with_usage(usage);
                }
                Err(e) if e.is_cancelled() => {
                    warn!(task_id = %task.id, attempt, "Task cancelled");
                    return SubTaskResult::failure(task, TaskweaveError::Cancelled, attempt, start.elapsed())
                        .with_usage(usage);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt >= max_attempts {
                        error!(
                            task_id = %task.id,
                            agent = %task.agent_name,
                            attempt,
                            error = %e,
                            "Task failed"
                        );
                        let err = TaskweaveError::task_execution(&task.id, attempt, e);
                        return SubTaskResult::failure(task, err, attempt, start.elapsed())
                            .with_usage(usage);
                    }

                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        task_id = %task.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Task attempt failed, backing off"
                    );

                    let cancelled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        warn!(task_id = %task.id, attempt, "Task cancelled during backoff");
                        return SubTaskResult::failure(task, TaskweaveError::Cancelled, attempt, start.elapsed())
                            .with_usage(usage);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskweave_core::{AgentInvoker, AgentOutput, TaskweaveResult};

    /// An agent that returns a scripted sequence of results.
    struct ScriptedAgent {
        /// Results to return in order; pops from front on each call.
        results: tokio::sync::Mutex<Vec<TaskweaveResult<AgentOutput>>>,
        call_count: AtomicU32,
    }

    impl ScriptedAgent {
        fn new(results: Vec<TaskweaveResult<AgentOutput>>) -> Self {
            Self {
                results: tokio::sync::Mutex::new(results),
                call_count: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        async fn invoke(&self, _description: &str, _input: &Value) -> TaskweaveResult<AgentOutput> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(TaskweaveError::Agent("ScriptedAgent: no more results".into()))
            } else {
                results.remove(0)
            }
        }
    }

    struct SlowAgent {
        delay: Duration,
        call_count: AtomicU32,
    }

    #[async_trait]
    impl AgentInvoker for SlowAgent {
        async fn invoke(&self, _description: &str, _input: &Value) -> TaskweaveResult<AgentOutput> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(AgentOutput::new("late"))
        }
    }

    fn runner_with(agent: Arc<dyn AgentInvoker>, policy: RetryPolicy) -> TaskRunner {
        let registry = AgentRegistry::new().with_agent("worker", agent);
        TaskRunner::new(Arc::new(registry), policy, Duration::from_secs(5))
    }

    fn transient() -> TaskweaveResult<AgentOutput> {
        Err(TaskweaveError::Agent("503 Service Unavailable".into()))
    }

    fn task() -> SubTask {
        SubTask::new("t1", "do the thing", "worker")
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(AgentOutput::new(json!({"n": 1}))
            .with_usage(TokenUsage::new(10, 5)))]));
        let runner = runner_with(agent.clone(), RetryPolicy::immediate(3));

        let result = runner.run(&task(), &CancellationToken::new()).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.output["n"], 1);
        assert_eq!(result.usage.total_tokens, 15);
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            transient(),
            transient(),
            Ok(AgentOutput::new("ok")),
        ]));
        let runner = runner_with(agent.clone(), RetryPolicy::immediate(3));

        let result = runner.run(&task(), &CancellationToken::new()).await;
        assert!(result.is_success(), "got {:?}", result.error);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.output, json!("ok"));
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Err(TaskweaveError::Agent("first".into())),
            Err(TaskweaveError::Agent("second".into())),
            Err(TaskweaveError::Agent("last".into())),
            Ok(AgentOutput::new("never reached")),
        ]));
        let runner = runner_with(agent.clone(), RetryPolicy::immediate(3));

        let result = runner.run(&task(), &CancellationToken::new()).await;
        assert_eq!(result.attempts, 3);
        assert_eq!(agent.calls(), 3);
        match result.error.unwrap() {
            TaskweaveError::TaskExecution {
                task_id,
                attempts,
                cause,
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(attempts, 3);
                assert_eq!(cause.to_string(), "Agent error: last");
            }
            other => panic!("Expected TaskExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_agent_is_not_retried() {
        let runner = runner_with(Arc::new(ScriptedAgent::new(vec![])), RetryPolicy::immediate(3));
        let orphan = SubTask::new("t9", "d", "ghost");

        let result = runner.run(&orphan, &CancellationToken::new()).await;
        assert_eq!(result.attempts, 0);
        assert!(matches!(
            result.error,
            Some(TaskweaveError::UnknownAgent { ref agent, .. }) if agent == "ghost"
        ));
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Err(TaskweaveError::Config("bad credentials file".into())),
            Ok(AgentOutput::new("should not reach")),
        ]));
        let runner = runner_with(agent.clone(), RetryPolicy::immediate(5));

        let result = runner.run(&task(), &CancellationToken::new()).await;
        assert_eq!(result.attempts, 1);
        assert_eq!(agent.calls(), 1);
        assert!(!result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failed_attempt() {
        let agent = Arc::new(SlowAgent {
            delay: Duration::from_millis(100),
            call_count: AtomicU32::new(0),
        });
        let registry = AgentRegistry::new().with_agent("worker", agent.clone());
        let runner = TaskRunner::new(
            Arc::new(registry),
            RetryPolicy::immediate(2),
            Duration::from_millis(10),
        );

        let result = runner.run(&task(), &CancellationToken::new()).await;
        assert_eq!(result.attempts, 2);
        assert_eq!(agent.call_count.load(Ordering::SeqCst), 2);
        match result.error.unwrap() {
            TaskweaveError::TaskExecution { cause, .. } => {
                assert!(matches!(*cause, TaskweaveError::Timeout(_)));
            }
            other => panic!("Expected TaskExecution, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let agent = Arc::new(ScriptedAgent::new(vec![transient(), transient(), transient()]));
        let runner = runner_with(
            agent,
            RetryPolicy {
                max_retries: 3,
                backoff_base_ms: 100,
                backoff_max_ms: 1_000,
            },
        );

        let start = Instant::now();
        let result = runner.run(&task(), &CancellationToken::new()).await;
        // 100ms after attempt 1, 200ms after attempt 2, nothing after the last.
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(350),
            "unexpected backoff total {elapsed:?}"
        );
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff() {
        let agent = Arc::new(ScriptedAgent::new(vec![transient(), Ok(AgentOutput::new("ok"))]));
        let runner = runner_with(
            agent.clone(),
            RetryPolicy {
                max_retries: 3,
                backoff_base_ms: 10_000,
                backoff_max_ms: 10_000,
            },
        );
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        let result = runner.run(&task(), &token).await;
        canceller.await.unwrap();
        assert!(matches!(result.error, Some(TaskweaveError::Cancelled)));
        assert_eq!(result.attempts, 1);
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_invocation() {
        let agent = Arc::new(SlowAgent {
            delay: Duration::from_secs(60),
            call_count: AtomicU32::new(0),
        });
        let registry = AgentRegistry::new().with_agent("worker", agent);
        let runner = TaskRunner::new(
            Arc::new(registry),
            RetryPolicy::immediate(3),
            Duration::from_secs(120),
        );
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                token.cancel();
            })
        };

        let result = runner.run(&task(), &token).await;
        canceller.await.unwrap();
        assert!(matches!(result.error, Some(TaskweaveError::Cancelled)));
        assert_eq!(result.attempts, 1);
    }
}
