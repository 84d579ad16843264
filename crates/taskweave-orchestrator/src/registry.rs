use std::collections::HashMap;
use std::sync::Arc;
use taskweave_core::{AgentInvoker, SubTask, TaskweaveError, TaskweaveResult};

/// Named agents available to a run.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentInvoker>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, agent: Arc<dyn AgentInvoker>) {
        self.agents.insert(name.into(), agent);
    }

    pub fn with_agent(mut self, name: impl Into<String>, agent: Arc<dyn AgentInvoker>) -> Self {
        self.register(name, agent);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentInvoker>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Fail on the first task (in input order) whose agent is not registered.
    pub fn validate(&self, subtasks: &[SubTask]) -> TaskweaveResult<()> {
        match subtasks.iter().find(|t| !self.contains(&t.agent_name)) {
            Some(task) => Err(TaskweaveError::UnknownAgent {
                task_id: task.id.clone(),
                agent: task.agent_name.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
