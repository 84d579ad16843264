//! Dependency graph and execution layering.
//!
//! Layers are produced with Kahn's algorithm: a layer is the set of tasks
//! whose remaining indegree is zero once every earlier layer has been removed
//! from the graph. Tasks are addressed by their position in the input batch,
//! so "input order" and "index order" are the same thing.

use std::collections::{HashMap, HashSet};
use taskweave_core::{SubTask, TaskweaveError, TaskweaveResult};

/// Adjacency and layering for one batch of sub-tasks.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// Deduplicated dependencies of each task, in declaration order.
    dependencies: Vec<Vec<usize>>,
    /// Tasks depending on each task, in input order.
    dependents: Vec<Vec<usize>>,
    layers: Vec<Vec<usize>>,
    layer_of: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph and its layers.
    ///
    /// # Errors
    /// - [`TaskweaveError::DuplicateTaskId`] if two tasks share an ID.
    /// - [`TaskweaveError::UnknownTaskReference`] if a dependency names a task
    ///   outside the batch. Checked before layering begins.
    /// - [`TaskweaveError::CyclicDependency`] listing every task that could
    ///   not be layered (a self-dependency counts).
    pub fn build(subtasks: &[SubTask]) -> TaskweaveResult<Self> {
        let mut index = HashMap::with_capacity(subtasks.len());
        for (i, task) in subtasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(TaskweaveError::DuplicateTaskId(task.id.clone()));
            }
        }

        let mut dependencies = Vec::with_capacity(subtasks.len());
        let mut dependents = vec![Vec::new(); subtasks.len()];
        for (i, task) in subtasks.iter().enumerate() {
            let mut seen = HashSet::new();
            let mut deps = Vec::with_capacity(task.dependencies.len());
            for dep in &task.dependencies {
                let &d = index
                    .get(dep)
                    .ok_or_else(|| TaskweaveError::UnknownTaskReference {
                        task_id: task.id.clone(),
                        missing: dep.clone(),
                    })?;
                if seen.insert(d) {
                    deps.push(d);
                    dependents[d].push(i);
                }
            }
            dependencies.push(deps);
        }

        let mut indegree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut layer_of = vec![usize::MAX; subtasks.len()];
        let mut layers: Vec<Vec<usize>> = Vec::new();

        let mut current: Vec<usize> = (0..subtasks.len()).filter(|&i| indegree[i] == 0).collect();
        while !current.is_empty() {
            let mut next = Vec::new();
            for &i in &current {
                layer_of[i] = layers.len();
                for &j in &dependents[i] {
                    indegree[j] -= 1;
                    if indegree[j] == 0 {
                        next.push(j);
                    }
                }
            }
            // Stable tie-break: members keep their input order.
            next.sort_unstable();
            layers.push(std::mem::replace(&mut current, next));
        }

        let unresolved: Vec<String> = (0..subtasks.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| subtasks[i].id.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(TaskweaveError::CyclicDependency {
                task_ids: unresolved,
            });
        }

        Ok(Self {
            ids: subtasks.iter().map(|t| t.id.clone()).collect(),
            index,
            dependencies,
            dependents,
            layers,
            layer_of,
        })
    }

    /// Layers as task indices into the input batch.
    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    /// Layers as task IDs.
    pub fn layer_ids(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| self.ids[i].clone()).collect())
            .collect()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// The layer a task was placed in.
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|&i| self.layer_of[i])
    }

    /// Task indices layer by layer, input order within a layer.
    pub fn execution_order(&self) -> Vec<usize> {
        self.layers.iter().flatten().copied().collect()
    }

    /// Dependency indices of the task at `index`.
    pub fn dependencies_of(&self, index: usize) -> &[usize] {
        self.dependencies.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// IDs of tasks that declare a dependency on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&j| self.ids[j].as_str()).collect())
            .unwrap_or_default()
    }

    pub fn task_id(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> SubTask {
        SubTask::new(id, format!("{id} description"), "worker").with_dependencies(deps.iter().copied())
    }

    /// Every task sits strictly above all of its dependencies.
    fn assert_layering_is_valid(tasks: &[SubTask], graph: &DependencyGraph) {
        for t in tasks {
            let layer = graph.layer_of(&t.id).unwrap();
            if t.dependencies.is_empty() {
                assert_eq!(layer, 0, "root task {} should be in layer 0", t.id);
            } else {
                let max_dep = t
                    .dependencies
                    .iter()
                    .map(|d| graph.layer_of(d).unwrap())
                    .max()
                    .unwrap();
                assert_eq!(layer, max_dep + 1, "task {} misplaced", t.id);
            }
        }
    }

    #[test]
    fn test_empty_batch() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.layer_count(), 0);
        assert!(graph.execution_order().is_empty());
    }

    #[test]
    fn test_independent_tasks_share_layer_zero() {
        let tasks = vec![task("a", &[]), task("b", &[]), task("c", &[])];
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(graph.layer_ids(), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_diamond() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(
            graph.layer_ids(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
        assert_eq!(graph.dependents("a"), vec!["b", "c"]);
        assert_layering_is_valid(&tasks, &graph);
    }

    #[test]
    fn test_layer_members_keep_input_order() {
        // Declared out of dependency order on purpose.
        let tasks = vec![
            task("z", &["root"]),
            task("y", &["root"]),
            task("root", &[]),
            task("x", &["root"]),
        ];
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(graph.layer_ids(), vec![vec!["root"], vec!["z", "y", "x"]]);
        assert_eq!(graph.execution_order(), vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_uneven_depths() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &["a", "c"]),
            task("e", &[]),
            task("f", &["e", "b"]),
        ];
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_layering_is_valid(&tasks, &graph);
        assert_eq!(graph.layer_of("d"), Some(3));
        assert_eq!(graph.layer_of("f"), Some(2));
        assert_eq!(graph.layer_of("missing"), None);
    }

    #[test]
    fn test_duplicate_dependency_entries_are_collapsed() {
        let tasks = vec![task("a", &[]), task("b", &["a", "a"])];
        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(graph.dependencies_of(1), &[0]);
        assert_eq!(graph.layer_ids(), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_cycle_lists_unresolved_tasks() {
        let tasks = vec![
            task("ok", &[]),
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("after", &["a"]),
        ];
        match DependencyGraph::build(&tasks).unwrap_err() {
            TaskweaveError::CyclicDependency { task_ids } => {
                assert_eq!(task_ids, vec!["a", "b", "c", "after"]);
            }
            other => panic!("Expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let tasks = vec![task("a", &["a"])];
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(TaskweaveError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let tasks = vec![task("x", &["y"])];
        match DependencyGraph::build(&tasks).unwrap_err() {
            TaskweaveError::UnknownTaskReference { task_id, missing } => {
                assert_eq!(task_id, "x");
                assert_eq!(missing, "y");
            }
            other => panic!("Expected UnknownTaskReference, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_reference_wins_over_cycle() {
        let tasks = vec![task("a", &["b"]), task("b", &["a", "nope"])];
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(TaskweaveError::UnknownTaskReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(TaskweaveError::DuplicateTaskId(id)) if id == "a"
        ));
    }
}
