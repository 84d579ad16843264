//! Dependency-aware scheduling of sub-tasks across registered agents.
//!
//! A goal is decomposed into sub-tasks, layered by their dependencies, run
//! layer by layer under a concurrency bound with per-task timeout and retry,
//! and the results are merged by a configurable aggregation strategy.
//!
//! # Main types
//!
//! - [`Supervisor`] - Top-level façade running decompose → graph → schedule → aggregate.
//! - [`DependencyGraph`] - Validated, layered view of a sub-task batch.
//! - [`Scheduler`] - Executes layers with barrier semantics and a dependency-failure policy.
//! - [`TaskRunner`] - Runs one sub-task with timeout and exponential-backoff retry.
//! - [`ConcurrencyGate`] - Cancellable admission control for in-flight work.
//! - [`ResultAggregator`] - Parallel, hierarchy and consensus result merging.
//! - [`StatsCollector`] - Per-run execution counters.
//! - [`SupervisorConfig`] - Tunables loaded from TOML or built in code.

/// Result aggregation strategies.
pub mod aggregator;
/// Supervisor configuration and retry policy.
pub mod config;
/// Concurrency gate.
pub mod gate;
/// Dependency graph construction and layering.
pub mod graph;
/// Agent registry.
pub mod registry;
/// Single-task execution with timeout and retry.
pub mod runner;
/// Layer-by-layer scheduler.
pub mod scheduler;
/// Execution statistics.
pub mod stats;
/// Supervisor façade.
pub mod supervisor;

pub use aggregator::{EquivalenceFn, ResultAggregator};
pub use config::{DependencyFailurePolicy, RetryPolicy, SupervisorConfig};
pub use gate::{ConcurrencyGate, GatePermit};
pub use graph::DependencyGraph;
pub use registry::AgentRegistry;
pub use runner::TaskRunner;
pub use scheduler::{Interrupted, Scheduler};
pub use stats::{AgentStats, ExecutionStats, StatsCollector};
pub use supervisor::{ExecutionFailure, ExecutionOutcome, Supervisor, SupervisorPhase};

pub use tokio_util::sync::CancellationToken;
