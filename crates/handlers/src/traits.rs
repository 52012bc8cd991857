//! The `TaskHandler` trait — the contract every task type must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::HandlerError;

/// Context passed to a handler for one task invocation.
///
/// Defined here (in the handlers crate) so both the engine and individual
/// handler implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// ID of the parent workflow definition.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// ID of the task being executed.
    pub task_id: String,
    /// The task's opaque configuration block.
    pub config: Value,
    /// Snapshot of the execution variables at dispatch time.
    pub variables: HashMap<String, Value>,
    /// Outputs of previously completed tasks, keyed by task id.
    pub results: HashMap<String, Value>,
    /// Cancellation signal; handlers must observe it at suspension points.
    pub cancel: CancelToken,
}

/// What a handler produced: an output value plus any variable updates the
/// engine should merge into the execution-wide variable mapping.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    /// The task's output, recorded in `task_results`.
    pub value: Value,
    /// Variable updates to merge into the execution variables.
    pub variables: HashMap<String, Value>,
}

impl HandlerOutput {
    /// An output with no variable updates.
    pub fn value(value: Value) -> Self {
        Self {
            value,
            variables: HashMap::new(),
        }
    }

    /// An output carrying variable updates.
    pub fn with_variables(value: Value, variables: HashMap<String, Value>) -> Self {
        Self { value, variables }
    }
}

/// The core handler trait.
///
/// All built-in handlers and external integrations must implement this.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The registry key this handler is registered under by default.
    fn task_type(&self) -> &str;

    /// Cheap structural check of a task's config, run before dispatch.
    ///
    /// A `false` here fails the task immediately with no retry.
    fn validate_config(&self, _config: &Value) -> bool {
        true
    }

    /// Execute the task against the given context.
    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError>;
}

impl HandlerContext {
    /// Convenience constructor used by tests and the built-in handlers' docs.
    pub fn for_task(task_id: impl Into<String>, config: Value) -> Self {
        Self {
            workflow_id: uuid::Uuid::new_v4(),
            execution_id: uuid::Uuid::new_v4(),
            task_id: task_id.into(),
            config,
            variables: HashMap::new(),
            results: HashMap::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the variable snapshot.
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Replace the prior-results snapshot.
    pub fn with_results(mut self, results: HashMap<String, Value>) -> Self {
        self.results = results;
        self
    }
}
