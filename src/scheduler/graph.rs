//! In-degree bookkeeping for the task DAG.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::task::TaskId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Dependency cycle involving {0} task(s)")]
    Cycle(usize),

    #[error("Task {task} depends on unknown task {dependency}")]
    MissingDependency { task: TaskId, dependency: TaskId },
}

/// Per-task count of unmet dependencies plus reverse adjacency.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    in_degree: HashMap<TaskId, usize>,
    dependencies: HashMap<TaskId, Vec<TaskId>>,
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` with its dependencies. Dependencies for which
    /// `satisfied` returns true do not count toward the in-degree.
    /// Returns the resulting in-degree.
    pub fn add_node<F>(&mut self, id: &TaskId, dependencies: &[TaskId], satisfied: F) -> usize
    where
        F: Fn(&TaskId) -> bool,
    {
        let mut unique: Vec<TaskId> = Vec::with_capacity(dependencies.len());
        let mut seen = HashSet::new();
        for dep in dependencies {
            if seen.insert(dep) {
                unique.push(dep.clone());
            }
        }

        let mut degree = 0;
        for dep in &unique {
            if satisfied(dep) {
                continue;
            }
            degree += 1;
            self.dependents.entry(dep.clone()).or_default().push(id.clone());
        }
        self.in_degree.insert(id.clone(), degree);
        self.dependencies.insert(id.clone(), unique);
        degree
    }

    /// Record completion of `id`; returns dependents whose in-degree fell to 0.
    pub fn complete(&mut self, id: &TaskId) -> Vec<TaskId> {
        let Some(dependents) = self.dependents.get(id) else {
            return Vec::new();
        };
        let mut released = Vec::new();
        for dependent in dependents {
            if let Some(degree) = self.in_degree.get_mut(dependent) {
                if *degree > 0 {
                    *degree -= 1;
                    if *degree == 0 {
                        released.push(dependent.clone());
                    }
                }
            }
        }
        released
    }

    pub fn in_degree(&self, id: &TaskId) -> Option<usize> {
        self.in_degree.get(id).copied()
    }

    pub fn dependents(&self, id: &TaskId) -> &[TaskId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every task reachable from `id` through dependent edges.
    pub fn transitive_dependents(&self, id: &TaskId) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&TaskId> = self.dependents(id).iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Check that every dependency is registered and that the graph is
    /// acyclic (Kahn's algorithm over the declared edges).
    pub fn validate(&self) -> Result<(), GraphError> {
        for (task, deps) in &self.dependencies {
            if let Some(dependency) = deps.iter().find(|d| !self.dependencies.contains_key(*d)) {
                return Err(GraphError::MissingDependency {
                    task: task.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let mut remaining: HashMap<&TaskId, usize> =
            self.dependencies.iter().map(|(id, deps)| (id, deps.len())).collect();
        let mut queue: VecDeque<&TaskId> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        // Satisfied dependencies never reach `dependents`, so walk the
        // declared edges instead.
        let mut declared: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
        for (task, deps) in &self.dependencies {
            for dep in deps {
                declared.entry(dep).or_default().push(task);
            }
        }
        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in declared.get(id).into_iter().flatten().copied() {
                if let Some(degree) = remaining.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if visited == self.dependencies.len() {
            Ok(())
        } else {
            Err(GraphError::Cycle(self.dependencies.len() - visited))
        }
    }

    pub fn len(&self) -> usize {
        self.in_degree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_degree.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_degree.clear();
        self.dependencies.clear();
        self.dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|n| TaskId::from(*n)).collect()
    }

    #[test]
    fn completion_releases_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_node(&"a".into(), &[], |_| false);
        graph.add_node(&"b".into(), &ids(&["a"]), |_| false);
        graph.add_node(&"c".into(), &ids(&["a", "b"]), |_| false);

        assert_eq!(graph.in_degree(&"c".into()), Some(2));
        assert_eq!(graph.complete(&"a".into()), ids(&["b"]));
        assert_eq!(graph.in_degree(&"c".into()), Some(1));
        assert_eq!(graph.complete(&"b".into()), ids(&["c"]));
    }

    #[test]
    fn satisfied_and_duplicate_dependencies_are_not_counted() {
        let mut graph = DependencyGraph::new();
        let degree = graph.add_node(&"x".into(), &ids(&["done", "open", "open"]), |d| d.as_str() == "done");
        assert_eq!(degree, 1);
    }

    #[test]
    fn transitive_dependents_follow_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_node(&"a".into(), &[], |_| false);
        graph.add_node(&"b".into(), &ids(&["a"]), |_| false);
        graph.add_node(&"c".into(), &ids(&["b"]), |_| false);
        graph.add_node(&"d".into(), &[], |_| false);

        let reach = graph.transitive_dependents(&"a".into());
        assert_eq!(reach.len(), 2);
        assert!(reach.contains(&TaskId::from("c")));
        assert!(!reach.contains(&TaskId::from("d")));
    }

    #[test]
    fn validate_detects_cycles_and_missing_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_node(&"a".into(), &ids(&["b"]), |_| false);
        graph.add_node(&"b".into(), &ids(&["a"]), |_| false);
        assert_eq!(graph.validate(), Err(GraphError::Cycle(2)));

        let mut graph = DependencyGraph::new();
        graph.add_node(&"a".into(), &ids(&["ghost"]), |_| false);
        assert!(matches!(graph.validate(), Err(GraphError::MissingDependency { .. })));
    }
}
