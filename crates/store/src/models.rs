//! Persistence models for execution state.
//!
//! These are *persistence* models — they carry the full audit record of a
//! run and no orchestration behaviour. Workflow definitions live in the
//! `engine` crate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Possible statuses for a single task within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// The recorded outcome of one task within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    /// Handler output; absent for skipped/failed/cancelled tasks.
    pub output: Option<Value>,
    /// Failure message, if the task failed.
    pub error: Option<String>,
    /// Why a task was skipped: `dependency_not_met` or `condition_not_met`.
    pub reason: Option<String>,
    /// Invocation attempts, including the successful one.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// A freshly dispatched, running task.
    pub fn running(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Running,
            output: None,
            error: None,
            reason: None,
            attempts: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// A task skipped before dispatch.
    pub fn skipped(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Skipped,
            output: None,
            error: None,
            reason: Some(reason.into()),
            attempts: 0,
            started_at: now,
            ended_at: Some(now),
        }
    }

    /// A task reclaimed by execution-level cancellation before it started.
    pub fn cancelled_before_start(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Cancelled,
            output: None,
            error: None,
            reason: Some("execution_cancelled".to_string()),
            attempts: 0,
            started_at: now,
            ended_at: Some(now),
        }
    }

    pub fn complete(&mut self, output: Value, attempts: u32) {
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.attempts = attempts;
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.attempts = attempts;
        self.ended_at = Some(Utc::now());
    }

    pub fn cancel(&mut self, attempts: u32) {
        self.status = TaskStatus::Cancelled;
        self.attempts = attempts;
        self.ended_at = Some(Utc::now());
    }

    pub fn is_successful(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// The full persisted state of one workflow execution.
///
/// Created when an execution starts, mutated only by its owning engine
/// instance, persisted after every task transition, immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Execution-wide variable bindings (seeded from the definition plus
    /// caller overrides, mutated by task outputs).
    pub variables: HashMap<String, Value>,
    /// Per-task outcomes, keyed by task id. Append-only: ids are never
    /// removed, records only advance through the task state machine.
    pub task_results: HashMap<String, TaskResult>,
    /// Task ids currently running.
    pub running_tasks: Vec<String>,
    /// Summary of the first failure, when the execution failed.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(execution_id: Uuid, workflow_id: Uuid, variables: HashMap<String, Value>) -> Self {
        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Pending,
            variables,
            task_results: HashMap::new(),
            running_tasks: Vec::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Number of tasks that completed successfully.
    pub fn completed_tasks(&self) -> usize {
        self.task_results
            .values()
            .filter(|r| r.is_successful())
            .count()
    }

    /// Wall-clock duration, once the execution has ended.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .map(|end| (end - self.started_at).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Condensed view for listings and dashboards.
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: self.execution_id,
            workflow_id: self.workflow_id,
            status: self.status,
            completed_tasks: self.completed_tasks(),
            total_tasks: self.task_results.len(),
            duration_ms: self.duration().map(|d| d.as_millis() as u64),
            started_at: self.started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionSummary
// ---------------------------------------------------------------------------

/// One row of `list` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub duration_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
}
