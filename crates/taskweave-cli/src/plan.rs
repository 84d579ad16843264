use crate::agents::ShellAgent;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use taskweave_core::{AggregationStrategy, DecomposedTask, SubTask};
use taskweave_orchestrator::{AgentRegistry, DependencyGraph, SupervisorConfig};

/// A run described in TOML: supervisor settings, shell agents and a fixed
/// task list.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub goal: String,
    /// Suggested strategy, used unless `[config]` or `--strategy` overrides it.
    #[serde(default)]
    pub strategy: AggregationStrategy,
    #[serde(default)]
    pub config: SupervisorConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub tasks: Vec<SubTask>,
}

/// A named agent backed by a shell command.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub command: String,
}

impl Plan {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let plan: Plan = toml::from_str(raw).context("Invalid plan file")?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file '{}'", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Check the plan without running anything and return its dependency graph.
    pub fn validate(&self) -> anyhow::Result<DependencyGraph> {
        self.config.validate()?;

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                anyhow::bail!("Agent '{}' is defined more than once", agent.name);
            }
            if agent.command.trim().is_empty() {
                anyhow::bail!("Agent '{}' has an empty command", agent.name);
            }
        }

        let graph = DependencyGraph::build(&self.tasks)?;
        self.registry().validate(&self.tasks)?;
        Ok(graph)
    }

    pub fn registry(&self) -> AgentRegistry {
        self.agents.iter().fold(AgentRegistry::new(), |registry, agent| {
            registry.with_agent(
                agent.name.clone(),
                Arc::new(ShellAgent::new(&agent.name, &agent.command)),
            )
        })
    }

    pub fn decomposed(&self) -> DecomposedTask {
        DecomposedTask::new(self.goal.clone(), self.tasks.clone()).with_strategy(self.strategy)
    }
}
