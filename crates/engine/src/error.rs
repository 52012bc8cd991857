//! Engine-level error types.
//!
//! Business-logic failures inside tasks are *not* errors — they are recorded
//! in the execution's task results and summarized on the execution status.
//! These types cover definition validation, trigger registration, and
//! infrastructure failures only.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while validating and materializing a workflow definition.
///
/// `load` fails fast — a definition error means no graph was produced.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The document did not deserialize (missing field, wrong type, …).
    #[error("invalid workflow document: {0}")]
    Parse(String),

    /// A workflow must contain at least one task.
    #[error("workflow has no tasks")]
    EmptyWorkflow,

    /// Two or more tasks share the same ID.
    #[error("duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    /// A task depends on an ID that doesn't exist in the workflow.
    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {path}")]
    Cycle { path: String },

    /// A task condition failed to parse.
    #[error("task '{task_id}' has an invalid condition '{expression}': {reason}")]
    InvalidCondition {
        task_id: String,
        expression: String,
        reason: String,
    },
}

/// Errors produced by the workflow engine and scheduler.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition validation failed; no graph was produced.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A schedule referenced a workflow that was never registered.
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(Uuid),

    /// A trigger expression failed to parse at registration time.
    #[error("invalid trigger expression '{expression}': {reason}")]
    InvalidTrigger { expression: String, reason: String },

    /// No execution with this id, live or persisted.
    #[error("unknown execution: {0}")]
    ExecutionNotFound(Uuid),

    /// Persistence failure from the state store.
    #[error("state store error: {0}")]
    Store(#[from] store::StoreError),
}
