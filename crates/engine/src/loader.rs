//! Workflow definition loader — validate before anything executes.
//!
//! Turns an already-parsed JSON document into a [`WorkflowDefinition`], or
//! fails with a [`DefinitionError`]. Validation is all-or-nothing: a partial
//! graph is never returned.

use serde_json::Value;
use tracing::debug;

use crate::error::DefinitionError;
use crate::graph::validate_graph;
use crate::models::WorkflowDefinition;

/// Validate and materialize a workflow document.
///
/// Checks performed, in order:
/// 1. Structural deserialization (missing/ill-typed fields).
/// 2. At least one task.
/// 3. Unique task ids, known dependency references, acyclic graph.
/// 4. Every condition expression parses.
///
/// An `id` is assigned when the document carries none.
pub fn load(document: Value) -> Result<WorkflowDefinition, DefinitionError> {
    let definition: WorkflowDefinition =
        serde_json::from_value(document).map_err(|e| DefinitionError::Parse(e.to_string()))?;

    if definition.tasks.is_empty() {
        return Err(DefinitionError::EmptyWorkflow);
    }

    let order = validate_graph(&definition.tasks)?;

    for task in &definition.tasks {
        for condition in &task.conditions {
            handlers::expr::parse(condition).map_err(|e| DefinitionError::InvalidCondition {
                task_id: task.id.clone(),
                expression: condition.clone(),
                reason: e.to_string(),
            })?;
        }
    }

    debug!(
        workflow = %definition.name,
        tasks = definition.tasks.len(),
        "definition loaded, execution order: {order:?}"
    );

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_document() -> Value {
        json!({
            "name": "nightly-cleanup",
            "tasks": [
                { "id": "gather", "type": "script",
                  "config": { "expression": "true" } },
                { "id": "prune", "type": "script", "depends_on": ["gather"],
                  "config": { "expression": "true" } },
            ],
        })
    }

    #[test]
    fn valid_document_loads_and_gets_an_id() {
        let definition = load(minimal_document()).expect("should load");
        assert_eq!(definition.name, "nightly-cleanup");
        assert_eq!(definition.version, "1.0");
        assert_eq!(definition.tasks.len(), 2);
        assert!(!definition.id.is_nil());
    }

    #[test]
    fn explicit_id_is_preserved() {
        let mut document = minimal_document();
        let id = uuid::Uuid::new_v4();
        document["id"] = json!(id.to_string());

        let definition = load(document).expect("should load");
        assert_eq!(definition.id, id);
    }

    #[test]
    fn missing_name_fails_parse() {
        let document = json!({ "tasks": [{ "id": "a", "type": "wait" }] });
        assert!(matches!(load(document), Err(DefinitionError::Parse(_))));
    }

    #[test]
    fn missing_task_type_fails_parse() {
        let document = json!({
            "name": "bad",
            "tasks": [{ "id": "a" }],
        });
        assert!(matches!(load(document), Err(DefinitionError::Parse(_))));
    }

    #[test]
    fn empty_task_list_is_rejected() {
        let document = json!({ "name": "empty", "tasks": [] });
        assert!(matches!(load(document), Err(DefinitionError::EmptyWorkflow)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let document = json!({
            "name": "dupes",
            "tasks": [
                { "id": "a", "type": "wait" },
                { "id": "a", "type": "wait" },
            ],
        });
        assert!(matches!(
            load(document),
            Err(DefinitionError::DuplicateTaskId(id)) if id == "a"
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let document = json!({
            "name": "dangling",
            "tasks": [
                { "id": "a", "type": "wait", "depends_on": ["missing"] },
            ],
        });
        assert!(matches!(
            load(document),
            Err(DefinitionError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn cyclic_document_fails_and_yields_no_graph() {
        let document = json!({
            "name": "cyclic",
            "tasks": [
                { "id": "a", "type": "wait", "depends_on": ["b"] },
                { "id": "b", "type": "wait", "depends_on": ["a"] },
            ],
        });
        assert!(matches!(load(document), Err(DefinitionError::Cycle { .. })));
    }

    #[test]
    fn malformed_condition_fails_load() {
        let document = json!({
            "name": "gated",
            "tasks": [
                { "id": "a", "type": "wait",
                  "conditions": ["variables.x =="] },
            ],
        });
        assert!(matches!(
            load(document),
            Err(DefinitionError::InvalidCondition { task_id, .. }) if task_id == "a"
        ));
    }

    #[test]
    fn well_formed_conditions_pass() {
        let document = json!({
            "name": "gated",
            "variables": { "enabled": true },
            "tasks": [
                { "id": "a", "type": "wait",
                  "conditions": ["variables.enabled == true"] },
            ],
        });
        assert!(load(document).is_ok());
    }
}
