// Task DAG Scheduler
// Computes the runnable frontier from dependency state, and validates the
// work-breakdown graph at spec-store time. The runtime assumes acyclicity;
// cycles are a schema violation rejected before any task exists.

use std::collections::{HashMap, HashSet};

use ralph_types::{Task, TaskStatus, WorkItem};

/// Tasks eligible to run now: status queued or retry, every dependency
/// satisfied by a completed task. Input order (creation order) is preserved,
/// which makes the frontier stable and total.
pub fn runnable_frontier(tasks: &[Task]) -> Vec<&Task> {
    let completed: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.task_key.as_str())
        .collect();

    tasks
        .iter()
        .filter(|task| {
            matches!(task.status, TaskStatus::Queued | TaskStatus::Retry)
                && task
                    .depends_on
                    .iter()
                    .all(|dep| completed.contains(dep.as_str()))
        })
        .collect()
}

/// Count of tasks that have not completed.
pub fn pending_count(tasks: &[Task]) -> usize {
    tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Completed)
        .count()
}

/// Validate a spec work breakdown: non-empty, unique ids, known
/// dependencies, no cycles.
pub fn validate_work_breakdown(items: &[WorkItem]) -> Result<(), GraphError> {
    if items.is_empty() {
        return Err(GraphError::Empty);
    }

    let ids: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
    if ids.len() != items.len() {
        return Err(GraphError::DuplicateId);
    }

    for item in items {
        for dep in &item.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    item_id: item.id.clone(),
                    dependency_id: dep.clone(),
                });
            }
        }
    }

    if let Some(path) = detect_cycle(items) {
        return Err(GraphError::CycleDetected { path });
    }

    Ok(())
}

fn detect_cycle(items: &[WorkItem]) -> Option<Vec<String>> {
    let by_id: HashMap<&str, &WorkItem> =
        items.iter().map(|item| (item.id.as_str(), item)).collect();

    for item in items {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if dfs_cycle(&item.id, &by_id, &mut visited, &mut path) {
            return Some(path);
        }
    }

    None
}

fn dfs_cycle(
    id: &str,
    by_id: &HashMap<&str, &WorkItem>,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if path.iter().any(|seen| seen == id) {
        path.push(id.to_string());
        return true;
    }
    if visited.contains(id) {
        return false;
    }

    visited.insert(id.to_string());
    path.push(id.to_string());

    if let Some(item) = by_id.get(id) {
        for dep in &item.depends_on {
            if dfs_cycle(dep, by_id, visited, path) {
                return true;
            }
        }
    }

    path.pop();
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    Empty,
    DuplicateId,
    UnknownDependency {
        item_id: String,
        dependency_id: String,
    },
    CycleDetected {
        path: Vec<String>,
    },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "work breakdown is empty"),
            Self::DuplicateId => write!(f, "duplicate work item id"),
            Self::UnknownDependency {
                item_id,
                dependency_id,
            } => write!(
                f,
                "work item '{}' depends on unknown item '{}'",
                item_id, dependency_id
            ),
            Self::CycleDetected { path } => {
                write!(f, "dependency cycle: {}", path.join(" -> "))
            }
        }
    }
}

impl std::error::Error for GraphError {}
