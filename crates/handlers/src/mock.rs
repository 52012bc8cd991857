//! `MockHandler` — a test double for `TaskHandler`.
//!
//! Useful in unit and integration tests where a real handler implementation
//! is either unavailable or irrelevant. Behaviour is injected at construction
//! time; every invocation is recorded so tests can assert on call counts and
//! dispatch order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::traits::{HandlerContext, HandlerOutput, TaskHandler};

/// Behaviour injected into `MockHandler` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail the first `failures` calls with a retryable error, then succeed.
    FailTimes { failures: u32, then: Value },
    /// Always fail with a retryable execution error.
    FailAlways(String),
    /// Always fail with a config error (no retry).
    FailConfig(String),
    /// Sleep for the given duration, then return the value.
    Sleep { duration: Duration, then: Value },
    /// Park until the cancellation token fires, then report cancelled.
    BlockUntilCancelled,
}

/// A shared, ordered log of task ids, for asserting dispatch order across
/// several mock handlers in one workflow.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A mock handler that records every call it receives and returns a
/// programmer-specified result.
pub struct MockHandler {
    /// Registry type name, also used in test assertions.
    pub type_name: String,
    /// What the handler does when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All task ids seen by this handler (in call order).
    pub calls: CallLog,
    attempts: AtomicU32,
}

impl MockHandler {
    pub fn new(type_name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            type_name: type_name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicU32::new(0),
        }
    }

    /// A mock that always succeeds with the given value.
    pub fn returning(type_name: impl Into<String>, value: Value) -> Self {
        Self::new(type_name, MockBehaviour::ReturnValue(value))
    }

    /// A mock that fails `failures` times, then succeeds with `then`.
    pub fn flaky(type_name: impl Into<String>, failures: u32, then: Value) -> Self {
        Self::new(type_name, MockBehaviour::FailTimes { failures, then })
    }

    /// A mock that always fails with a retryable error.
    pub fn failing(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_name, MockBehaviour::FailAlways(message.into()))
    }

    /// A mock that sleeps before succeeding (for timeout tests).
    pub fn sleeping(type_name: impl Into<String>, duration: Duration, then: Value) -> Self {
        Self::new(type_name, MockBehaviour::Sleep { duration, then })
    }

    /// A mock that blocks until cancelled (for cancellation tests).
    pub fn blocking(type_name: impl Into<String>) -> Self {
        Self::new(type_name, MockBehaviour::BlockUntilCancelled)
    }

    /// Share an external call log so several handlers record into one
    /// ordered sequence.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.calls = log;
        self
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskHandler for MockHandler {
    fn task_type(&self) -> &str {
        &self.type_name
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        self.calls.lock().unwrap().push(ctx.task_id.clone());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.behaviour {
            MockBehaviour::ReturnValue(value) => Ok(HandlerOutput::value(value.clone())),

            MockBehaviour::FailTimes { failures, then } => {
                if attempt <= *failures {
                    Err(HandlerError::Execution(format!(
                        "induced failure {attempt}/{failures}"
                    )))
                } else {
                    Ok(HandlerOutput::value(then.clone()))
                }
            }

            MockBehaviour::FailAlways(message) => Err(HandlerError::Execution(message.clone())),

            MockBehaviour::FailConfig(message) => Err(HandlerError::Config(message.clone())),

            MockBehaviour::Sleep { duration, then } => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(HandlerOutput::value(then.clone())),
                    _ = ctx.cancel.cancelled() => Err(HandlerError::Cancelled),
                }
            }

            MockBehaviour::BlockUntilCancelled => {
                ctx.cancel.cancelled().await;
                Err(HandlerError::Cancelled)
            }
        }
    }
}

/// A mock that emits variable updates alongside its value, for merge tests.
pub struct VariableSettingHandler {
    pub type_name: String,
    pub updates: Vec<(String, Value)>,
}

#[async_trait]
impl TaskHandler for VariableSettingHandler {
    fn task_type(&self) -> &str {
        &self.type_name
    }

    async fn execute(&self, _ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let variables = self.updates.iter().cloned().collect();
        Ok(HandlerOutput::with_variables(json!({ "ok": true }), variables))
    }
}
