//! Dependency graph validation — runs once at load time.
//!
//! Rules enforced:
//! 1. Task IDs must be unique within the workflow.
//! 2. Every `depends_on` entry must reference an existing task ID.
//! 3. The dependency graph must be acyclic; the error names the cycle.
//!
//! Returns task IDs in a topological order consistent with the dependency
//! partial order (dependencies before dependents).

use std::collections::{HashMap, HashSet};

use crate::error::DefinitionError;
use crate::models::TaskDefinition;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Validate the workflow's task graph and return a topological ordering.
///
/// # Errors
/// - [`DefinitionError::DuplicateTaskId`] if two tasks share an ID.
/// - [`DefinitionError::UnknownDependency`] if a dependency is missing.
/// - [`DefinitionError::Cycle`] if the graph is not acyclic; the message
///   names the offending cycle, e.g. `a -> b -> a`.
pub fn validate_graph(tasks: &[TaskDefinition]) -> Result<Vec<String>, DefinitionError> {
    // -----------------------------------------------------------------------
    // 1. Ensure task IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !seen_ids.insert(task.id.as_str()) {
            return Err(DefinitionError::DuplicateTaskId(task.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate dependency references
    // -----------------------------------------------------------------------
    let by_id: HashMap<&str, &TaskDefinition> =
        tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    for task in tasks {
        for dependency in &task.depends_on {
            if !by_id.contains_key(dependency.as_str()) {
                return Err(DefinitionError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Depth-first search: cycle detection + topological order
    // -----------------------------------------------------------------------
    let mut marks: HashMap<&str, Mark> =
        tasks.iter().map(|t| (t.id.as_str(), Mark::Unvisited)).collect();
    let mut order: Vec<String> = Vec::with_capacity(tasks.len());
    let mut path: Vec<&str> = Vec::new();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a TaskDefinition>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<String>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), DefinitionError> {
        match marks[id] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                // Back-edge: the cycle is the path suffix from the first
                // occurrence of `id`, closed with `id` itself.
                let start = path.iter().position(|&p| p == id).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(id);
                return Err(DefinitionError::Cycle {
                    path: cycle.join(" -> "),
                });
            }
            Mark::Unvisited => {}
        }

        marks.insert(id, Mark::InProgress);
        path.push(id);

        for dependency in &by_id[id].depends_on {
            visit(dependency.as_str(), by_id, marks, order, path)?;
        }

        path.pop();
        marks.insert(id, Mark::Done);
        order.push(id.to_string());
        Ok(())
    }

    // Visiting in declaration order keeps the output deterministic.
    for task in tasks {
        visit(task.id.as_str(), &by_id, &mut marks, &mut order, &mut path)?;
    }

    Ok(order)
}
