use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use taskweave_core::{AggregationStrategy, TaskweaveError, TaskweaveResult};
use tokio::sync::Semaphore;

/// Retry behaviour for a single sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget per task, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    ///
    /// `backoff_base * 2^(attempt - 1)`, capped at `backoff_max`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff(self, attempt))
    }
}

pub(crate) fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(exponent));
    delay.min(policy.backoff_max_ms)
}

/// What happens to a task whose dependency did not succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyFailurePolicy {
    /// Record a skipped result and keep going.
    #[default]
    Skip,
    /// Stop scheduling and return what has completed so far.
    Abort,
}

/// Options recognised by [`crate::Supervisor::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-attempt deadline for an agent invocation.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub on_dependency_failure: DependencyFailurePolicy,
    /// Overrides the decomposer's suggested strategy when set.
    #[serde(default)]
    pub aggregation_strategy: Option<AggregationStrategy>,
    /// Reject unknown agent names before any task runs.
    #[serde(default = "default_validate_agents")]
    pub validate_agents: bool,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_validate_agents() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout_ms: default_task_timeout_ms(),
            retry: RetryPolicy::default(),
            on_dependency_failure: DependencyFailurePolicy::default(),
            aggregation_strategy: None,
            validate_agents: default_validate_agents(),
        }
    }
}

impl SupervisorConfig {
    /// Parse a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> TaskweaveResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| TaskweaveError::Config(format!("Invalid supervisor config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> TaskweaveResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TaskweaveError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> TaskweaveResult<()> {
        if self.max_concurrency == 0 {
            return Err(TaskweaveError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(TaskweaveError::Config(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.retry.max_retries == 0 {
            return Err(TaskweaveError::Config(
                "retry.max_retries must be at least 1".into(),
            ));
        }
        if self.task_timeout_ms == 0 {
            return Err(TaskweaveError::Config(
                "task_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(TaskweaveError::Config(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dependency_failure(mut self, policy: DependencyFailurePolicy) -> Self {
        self.on_dependency_failure = policy;
        self
    }

    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.aggregation_strategy = Some(strategy);
        self
    }

    pub fn with_agent_validation(mut self, enabled: bool) -> Self {
        self.validate_agents = enabled;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.on_dependency_failure, DependencyFailurePolicy::Skip);
        assert!(config.aggregation_strategy.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_computation() {
        let policy = RetryPolicy {
            max_retries: 8,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        };

        assert_eq!(compute_backoff(&policy, 1), 500); // 500 * 2^0
        assert_eq!(compute_backoff(&policy, 2), 1000); // 500 * 2^1
        assert_eq!(compute_backoff(&policy, 3), 2000);
        assert_eq!(compute_backoff(&policy, 6), 16_000);
        assert_eq!(compute_backoff(&policy, 7), 30_000); // capped at max
        assert_eq!(compute_backoff(&policy, 200), 30_000); // no overflow
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SupervisorConfig::from_toml_str(
            r#"
            max_concurrency = 2
            on_dependency_failure = "abort"
            aggregation_strategy = "consensus"

            [retry]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.on_dependency_failure, DependencyFailurePolicy::Abort);
        assert_eq!(
            config.aggregation_strategy,
            Some(AggregationStrategy::Consensus)
        );
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base_ms, 500);
        assert_eq!(config.task_timeout_ms, 30_000);
    }

    #[test]
    fn test_from_toml_rejects_zero_concurrency() {
        let err = SupervisorConfig::from_toml_str("max_concurrency = 0").unwrap_err();
        assert!(matches!(err, TaskweaveError::Config(_)));
    }

    #[test]
    fn test_rejects_concurrency_above_permit_limit() {
        let err = SupervisorConfig::from_toml_str("max_concurrency = 9223372036854775807")
            .unwrap_err();
        assert!(err.to_string().contains("max_concurrency must be at most"));

        let at_limit = SupervisorConfig::default().with_max_concurrency(Semaphore::MAX_PERMITS);
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = SupervisorConfig::from_toml_str("max_concurrency = \"many\"").unwrap_err();
        assert!(err.to_string().starts_with("Config error: Invalid supervisor config"));
    }

    #[test]
    fn test_validate_backoff_order() {
        let config = SupervisorConfig::default().with_retry(RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 10,
            backoff_max_ms: 5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "task_timeout_ms = 250").unwrap();
        let config = SupervisorConfig::load(file.path()).unwrap();
        assert_eq!(config.task_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SupervisorConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, TaskweaveError::Config(_)));
    }
}
