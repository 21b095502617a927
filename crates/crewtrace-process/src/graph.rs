//! Dependency validation and deterministic ordering for one run's task set.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crewtrace_core::error::{CrewError, Result};
use crewtrace_core::task::Task;

use crate::agent::Agent;

/// Validated view over a submitted task set.
///
/// Construction fails on an empty set, duplicate ids, or a dependency that
/// names a task outside the set. Cycles are detected by [`TaskGraph::order`].
#[derive(Debug)]
pub struct TaskGraph<'a> {
    tasks: &'a [Task],
    index: HashMap<&'a str, usize>,
}

impl<'a> TaskGraph<'a> {
    pub fn new(tasks: &'a [Task]) -> Result<Self> {
        if tasks.is_empty() {
            return Err(CrewError::EmptyTaskSet);
        }

        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.as_str(), i).is_some() {
                return Err(CrewError::DuplicateTask(task.id.clone()));
            }
        }

        for task in tasks {
            if let Some(missing) = task
                .dependencies
                .iter()
                .find(|dep| !index.contains_key(dep.as_str()))
            {
                return Err(CrewError::MissingDependency {
                    task_id: task.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        Ok(Self { tasks, index })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.index.get(task_id).copied()
    }

    /// Kahn ordering as indices into the submitted slice.
    ///
    /// Ready tasks are queued in submission order, and every task is queued
    /// at most once even when several of its dependencies finish together.
    /// Any leftover task means a cycle; no partial order is returned.
    pub fn order(&self) -> Result<Vec<usize>> {
        let n = self.tasks.len();
        let deps: Vec<Vec<usize>> = self
            .tasks
            .iter()
            .map(|t| t.dependencies.iter().map(|d| self.index[d.as_str()]).collect())
            .collect();

        let mut processed = vec![false; n];
        let mut queued = vec![false; n];
        let mut queue = VecDeque::new();

        for (i, d) in deps.iter().enumerate() {
            if d.is_empty() {
                queue.push_back(i);
                queued[i] = true;
            }
        }

        let mut ordered = Vec::with_capacity(n);
        while let Some(current) = queue.pop_front() {
            ordered.push(current);
            processed[current] = true;

            for (i, d) in deps.iter().enumerate() {
                if !queued[i] && d.iter().all(|&dep| processed[dep]) {
                    queue.push_back(i);
                    queued[i] = true;
                }
            }
        }

        if ordered.len() < n {
            let remaining: Vec<String> = (0..n)
                .filter(|&i| !processed[i])
                .map(|i| self.tasks[i].id.clone())
                .collect();
            return Err(CrewError::CircularDependency {
                task_ids: remaining,
            });
        }

        debug!(
            order = ?ordered.iter().map(|&i| self.tasks[i].id.as_str()).collect::<Vec<_>>(),
            "Resolved task order"
        );
        Ok(ordered)
    }

    /// Task ids in execution order.
    pub fn ordered_ids(&self) -> Result<Vec<&'a str>> {
        Ok(self
            .order()?
            .into_iter()
            .map(|i| self.tasks[i].id.as_str())
            .collect())
    }

    /// Pick the agent for every task: its explicit assignment, or the first
    /// agent of the pool. Returns agent indices aligned with the task slice.
    pub fn resolve_agents(&self, agents: &[Agent]) -> Result<Vec<usize>> {
        self.tasks
            .iter()
            .map(|task| match task.agent.as_deref() {
                Some(agent_id) => agents
                    .iter()
                    .position(|a| a.id() == agent_id)
                    .ok_or_else(|| CrewError::AgentRequired {
                        task_id: task.id.clone(),
                        reason: format!("assigned agent '{}' is not part of the run", agent_id),
                    }),
                None if !agents.is_empty() => Ok(0),
                None => Err(CrewError::AgentRequired {
                    task_id: task.id.clone(),
                    reason: "no agent assigned and no agent pool to fall back on".into(),
                }),
            })
            .collect()
    }
}

/// Validate `tasks` and return their ids in execution order.
pub fn order(tasks: &[Task]) -> Result<Vec<String>> {
    let graph = TaskGraph::new(tasks)?;
    Ok(graph.ordered_ids()?.into_iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crewtrace_core::types::AgentProfile;
    use crewtrace_test_utils::EchoExecutor;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, format!("Task {}", id)).with_dependencies(deps.iter().copied())
    }

    fn agent(id: &str) -> Agent {
        Agent::new(AgentProfile::new(id, id), Arc::new(EchoExecutor))
    }

    #[test]
    fn test_ready_tasks_keep_submission_order() {
        let tasks = vec![task("C", &["A"]), task("B", &["A"]), task("A", &[])];
        assert_eq!(order(&tasks).unwrap(), vec!["A", "C", "B"]);
    }

    #[test]
    fn test_order_respects_dependencies() {
        let tasks = vec![
            task("report", &["analysis", "research"]),
            task("analysis", &["research"]),
            task("research", &[]),
            task("review", &["report"]),
            task("intro", &[]),
        ];
        let ordered = order(&tasks).unwrap();
        assert_eq!(ordered.len(), tasks.len());

        let pos = |id: &str| ordered.iter().position(|t| t == id).unwrap();
        for t in &tasks {
            for dep in &t.dependencies {
                assert!(pos(dep) < pos(&t.id), "{} must follow {}", t.id, dep);
            }
        }
    }

    #[test]
    fn test_shared_dependency_enqueues_once() {
        let tasks = vec![
            task("a", &[]),
            task("b", &[]),
            task("c", &["a", "b"]),
            task("d", &["a", "b"]),
        ];
        assert_eq!(order(&tasks).unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"]), task("d", &[])];
        let err = order(&tasks).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("circular dependency"));
        match err {
            CrewError::CircularDependency { task_ids } => assert_eq!(task_ids, vec!["a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let tasks = vec![task("a", &["a"])];
        assert!(matches!(order(&tasks), Err(CrewError::CircularDependency { .. })));
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(order(&[]), Err(CrewError::EmptyTaskSet)));

        let err = order(&[task("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("non-existent task"));

        let err = order(&[task("a", &[]), task("a", &[])]).unwrap_err();
        assert!(matches!(err, CrewError::DuplicateTask(id) if id == "a"));
    }

    #[test]
    fn test_resolve_agents() {
        let tasks = vec![task("a", &[]), task("b", &[]).with_agent("writer")];
        let graph = TaskGraph::new(&tasks).unwrap();

        let agents = vec![agent("researcher"), agent("writer")];
        assert_eq!(graph.resolve_agents(&agents).unwrap(), vec![0, 1]);

        let err = graph.resolve_agents(&[]).unwrap_err();
        assert!(err.to_string().contains("agent is required"));

        let err = graph.resolve_agents(&[agent("researcher")]).unwrap_err();
        assert!(matches!(err, CrewError::AgentRequired { task_id, .. } if task_id == "b"));
    }
}
