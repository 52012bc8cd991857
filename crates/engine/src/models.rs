//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They deserialize from an already-parsed JSON document; the
//! serialized encoding that produced that document is outside the engine's
//! contract.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a schedule starts new executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires on a cron expression. Five-field expressions get a seconds
    /// field prepended; six/seven-field expressions support second
    /// resolution directly.
    Cron {
        expression: String,
    },
    /// Fires when a named event is raised via `Scheduler::fire_event`.
    Event {
        name: String,
    },
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Per-task retry behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay before the first retry.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    /// Multiplier applied per retry for exponential back-off; 1.0 means a
    /// fixed delay.
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_backoff() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: default_retry_delay_ms(),
            backoff: default_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-indexed), capped at five minutes.
    pub fn delay_for(&self, retry: u32) -> Duration {
        const MAX_DELAY: Duration = Duration::from_secs(300);

        let millis = (self.delay_ms as f64 * self.backoff.powi(retry as i32)) as u64;
        let delay = Duration::from_millis(millis);
        delay.min(MAX_DELAY)
    }
}

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique identifier within this workflow (referenced by `depends_on`).
    pub id: String,

    /// Human-readable label; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    /// Maps to a registered `TaskHandler` implementation.
    #[serde(rename = "type")]
    pub task_type: String,

    /// Arbitrary configuration passed to the handler at execution time.
    #[serde(default)]
    pub config: Value,

    /// IDs of tasks that must complete successfully first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Gate expressions; all must evaluate true for the task to run.
    #[serde(default)]
    pub conditions: Vec<String>,

    /// Whether this task may run concurrently with other ready parallel
    /// tasks. Off by default — parallelism is opt-in per task.
    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Wall-clock budget for a single handler invocation.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskDefinition {
    /// Display label: the explicit name, or the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1.0".to_string()
}

/// A complete, validated workflow definition. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Assigned at load time when the document carries none.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Initial variable bindings for every execution of this workflow.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Tasks in declaration order — the deterministic dispatch tie-break.
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, tasks: Vec<TaskDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: default_version(),
            description: None,
            variables: HashMap::new(),
            tasks,
        }
    }

    /// Look a task up by id.
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_backs_off_exponentially() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay_ms: 100,
            backoff: 2.0,
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 30,
            delay_ms: 60_000,
            backoff: 10.0,
        };
        assert_eq!(policy.delay_for(5), Duration::from_secs(300));
    }

    #[test]
    fn fixed_delay_with_unit_backoff() {
        let policy = RetryPolicy {
            max_retries: 2,
            delay_ms: 250,
            backoff: 1.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(4), Duration::from_millis(250));
    }

    #[test]
    fn trigger_serde_shape() {
        let trigger: Trigger =
            serde_json::from_str(r#"{ "type": "cron", "expression": "0 * * * * *" }"#).unwrap();
        assert_eq!(
            trigger,
            Trigger::Cron {
                expression: "0 * * * * *".to_string()
            }
        );

        let event: Trigger =
            serde_json::from_str(r#"{ "type": "event", "name": "deploy_finished" }"#).unwrap();
        assert_eq!(
            event,
            Trigger::Event {
                name: "deploy_finished".to_string()
            }
        );
    }

    #[test]
    fn task_defaults_are_conservative() {
        let task: TaskDefinition = serde_json::from_str(
            r#"{ "id": "t1", "type": "wait" }"#,
        )
        .unwrap();

        assert!(!task.parallel);
        assert!(task.depends_on.is_empty());
        assert!(task.conditions.is_empty());
        assert_eq!(task.retry.max_retries, 0);
        assert!(task.timeout().is_none());
        assert_eq!(task.label(), "t1");
    }
}
