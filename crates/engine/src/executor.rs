//! Workflow execution engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Seeds the execution state from the definition plus caller overrides.
//! 2. Maintains the ready-set: tasks whose dependencies are all successful
//!    and whose conditions evaluate true.
//! 3. Dispatches ready tasks — parallel-flagged tasks concurrently, the rest
//!    one at a time in definition order.
//! 4. Enforces per-invocation timeouts, retries with back-off, and the
//!    cooperative cancellation token.
//! 5. Persists the full state snapshot after every task transition.
//!
//! A task failure marks the execution FAILED and stops new dispatch, but
//! already-running siblings drain to their own outcome. Variable merges are
//! applied serially here, in completion order, so parallel siblings writing
//! the same key are last-completion-wins — keep their write sets disjoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use handlers::expr::{self, ContextView};
use handlers::{CancelToken, HandlerContext, HandlerError, HandlerRegistry, TaskHandler};
use store::{
    ExecutionState, ExecutionStatus, ExecutionSummary, StateStore, TaskResult, TaskStatus,
};

use crate::error::EngineError;
use crate::models::{TaskDefinition, WorkflowDefinition};
use crate::query::{ExecutionTracker, LiveExecution};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to handler invocations whose task sets none.
    pub default_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal dispatch types
// ---------------------------------------------------------------------------

/// What one finished task hands back to the engine loop.
struct TaskOutcome {
    task_id: String,
    result: TaskResult,
    variables: HashMap<String, Value>,
}

/// Pre-dispatch decisions made while recomputing the ready-set.
enum GateAction {
    Skip { task_id: String, reason: &'static str },
    Fail { task_id: String, error: String },
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Orchestrates executions of validated workflow definitions.
///
/// One engine serves many concurrent executions; each execution's state is
/// mutated only by the loop that owns it.
pub struct WorkflowEngine {
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn StateStore>,
    tracker: ExecutionTracker,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<HandlerRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            tracker: ExecutionTracker::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one execution of `definition` to a terminal state.
    ///
    /// Returns the final [`ExecutionState`] even when the run FAILED or was
    /// CANCELLED — business failures live in the structured result.
    ///
    /// # Errors
    /// Only infrastructure problems (state-store failures) surface as `Err`.
    #[instrument(skip(self, definition, overrides), fields(workflow_id = %definition.id, workflow = %definition.name))]
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        overrides: HashMap<String, Value>,
    ) -> Result<ExecutionState, EngineError> {
        let execution_id = Uuid::new_v4();
        let cancel = CancelToken::new();

        let mut variables = definition.variables.clone();
        variables.extend(overrides);

        let mut state = ExecutionState::new(execution_id, definition.id, variables);
        self.store.save(&state).await?;
        state.status = ExecutionStatus::Running;
        self.store.save(&state).await?;

        info!(%execution_id, tasks = definition.tasks.len(), "execution started");

        let shared = Arc::new(RwLock::new(state));
        self.tracker
            .register(
                execution_id,
                LiveExecution {
                    state: Arc::clone(&shared),
                    cancel: cancel.clone(),
                },
            )
            .await;

        let outcome = self.run_to_completion(definition, &shared, &cancel).await;
        self.tracker.deregister(execution_id).await;
        outcome?;

        let final_state = shared.read().await.clone();
        info!(
            %execution_id,
            status = %final_state.status,
            completed = final_state.completed_tasks(),
            "execution finished"
        );
        Ok(final_state)
    }

    /// Request cancellation of a live execution.
    ///
    /// Dispatch stops immediately; in-flight handlers exit at their next
    /// cancellation checkpoint. Returns false when the execution is not
    /// live.
    pub async fn cancel(&self, execution_id: Uuid) -> bool {
        let cancelled = self.tracker.cancel(execution_id).await;
        if cancelled {
            info!(%execution_id, "cancellation requested");
        }
        cancelled
    }

    /// Live snapshot for an active execution, or the last persisted state.
    pub async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionState, EngineError> {
        if let Some(snapshot) = self.tracker.snapshot(execution_id).await {
            return Ok(snapshot);
        }
        match self.store.load(execution_id).await {
            Ok(state) => Ok(state),
            Err(store::StoreError::NotFound) => Err(EngineError::ExecutionNotFound(execution_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Execution summaries, most recent first.
    pub async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
    ) -> Result<Vec<ExecutionSummary>, EngineError> {
        let mut summaries = self.store.list(workflow_id, None).await?;
        summaries.reverse();
        Ok(summaries)
    }

    // -----------------------------------------------------------------------
    // Internal: the dispatch loop
    // -----------------------------------------------------------------------

    async fn run_to_completion(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<ExecutionState>>,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        let mut statuses: HashMap<String, TaskStatus> = definition
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskStatus::Pending))
            .collect();
        let mut join: JoinSet<TaskOutcome> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut failed = false;

        loop {
            // Cascade skips until the gate evaluation is stable: a skip can
            // make a downstream task's dependency terminally unsuccessful.
            loop {
                let actions = {
                    let state = shared.read().await;
                    evaluate_gates(definition, &statuses, &state)
                };
                if actions.is_empty() {
                    break;
                }
                for action in actions {
                    self.apply_gate_action(action, &mut statuses, shared, &mut failed)
                        .await?;
                }
            }

            let dispatch_allowed = !cancel.is_cancelled() && !failed;

            if dispatch_allowed {
                let ready = {
                    let state = shared.read().await;
                    ready_tasks(definition, &statuses, &state)
                };

                let mut serial: Option<TaskDefinition> = None;
                for task in ready {
                    if task.parallel {
                        self.mark_running(&task.id, &mut statuses, shared).await?;
                        let work = self.prepare_task(&task, shared, cancel).await;
                        let handle = join.spawn(work);
                        spawned.insert(handle.id(), task.id.clone());
                    } else if serial.is_none() {
                        // One non-parallel task at a time, definition order.
                        serial = Some(task);
                    }
                }

                if let Some(task) = serial {
                    self.mark_running(&task.id, &mut statuses, shared).await?;
                    let outcome = self.prepare_task(&task, shared, cancel).await.await;
                    self.apply_outcome(outcome, &mut statuses, shared, &mut failed)
                        .await?;
                    continue;
                }
            }

            match join.join_next().await {
                Some(Ok(outcome)) => {
                    spawned.retain(|_, id| id != &outcome.task_id);
                    self.apply_outcome(outcome, &mut statuses, shared, &mut failed)
                        .await?;
                }
                Some(Err(join_err)) => {
                    // A panicked handler still yields a recorded failure.
                    let task_id = spawned
                        .remove(&join_err.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    error!(%task_id, "task aborted: {join_err}");
                    let mut result = TaskResult::running(&task_id);
                    result.fail(format!("task aborted: {join_err}"), 0);
                    let outcome = TaskOutcome {
                        task_id,
                        result,
                        variables: HashMap::new(),
                    };
                    self.apply_outcome(outcome, &mut statuses, shared, &mut failed)
                        .await?;
                }
                None => break,
            }
        }

        self.finalize(definition, &statuses, shared, cancel.is_cancelled(), failed)
            .await
    }

    /// Snapshot the context and build the future that runs one task.
    ///
    /// The snapshot is taken at dispatch time: variables and prior results
    /// as of this moment, plus the execution-wide cancellation token.
    async fn prepare_task(
        &self,
        task: &TaskDefinition,
        shared: &Arc<RwLock<ExecutionState>>,
        cancel: &CancelToken,
    ) -> impl std::future::Future<Output = TaskOutcome> + Send + 'static {
        let ctx = {
            let state = shared.read().await;
            HandlerContext {
                workflow_id: state.workflow_id,
                execution_id: state.execution_id,
                task_id: task.id.clone(),
                config: task.config.clone(),
                variables: state.variables.clone(),
                results: completed_outputs(&state),
                cancel: cancel.clone(),
            }
        };
        let handler = self.registry.get(&task.task_type);
        run_task(task.clone(), handler, ctx, self.config.default_timeout)
    }

    async fn mark_running(
        &self,
        task_id: &str,
        statuses: &mut HashMap<String, TaskStatus>,
        shared: &Arc<RwLock<ExecutionState>>,
    ) -> Result<(), EngineError> {
        statuses.insert(task_id.to_string(), TaskStatus::Running);
        let snapshot = {
            let mut state = shared.write().await;
            state
                .task_results
                .insert(task_id.to_string(), TaskResult::running(task_id));
            state.running_tasks.push(task_id.to_string());
            state.clone()
        };
        self.store.save(&snapshot).await?;
        Ok(())
    }

    async fn apply_gate_action(
        &self,
        action: GateAction,
        statuses: &mut HashMap<String, TaskStatus>,
        shared: &Arc<RwLock<ExecutionState>>,
        failed: &mut bool,
    ) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = shared.write().await;
            match action {
                GateAction::Skip { task_id, reason } => {
                    info!(%task_id, reason, "task skipped");
                    statuses.insert(task_id.clone(), TaskStatus::Skipped);
                    state
                        .task_results
                        .insert(task_id.clone(), TaskResult::skipped(&task_id, reason));
                }
                GateAction::Fail { task_id, error } => {
                    error!(%task_id, "condition evaluation failed: {error}");
                    statuses.insert(task_id.clone(), TaskStatus::Failed);
                    let mut result = TaskResult::running(&task_id);
                    result.fail(error.clone(), 0);
                    state.task_results.insert(task_id.clone(), result);
                    if !*failed {
                        *failed = true;
                        state.status = ExecutionStatus::Failed;
                        state.error = Some(format!("task '{task_id}' failed: {error}"));
                    }
                }
            }
            state.clone()
        };
        self.store.save(&snapshot).await?;
        Ok(())
    }

    /// Record a finished task and merge its variable updates.
    ///
    /// Runs on the engine loop only, which is what serializes concurrent
    /// siblings' merges.
    async fn apply_outcome(
        &self,
        outcome: TaskOutcome,
        statuses: &mut HashMap<String, TaskStatus>,
        shared: &Arc<RwLock<ExecutionState>>,
        failed: &mut bool,
    ) -> Result<(), EngineError> {
        let TaskOutcome {
            task_id,
            result,
            variables,
        } = outcome;

        statuses.insert(task_id.clone(), result.status);

        let snapshot = {
            let mut state = shared.write().await;
            state.running_tasks.retain(|id| id != &task_id);

            match result.status {
                TaskStatus::Completed => {
                    info!(%task_id, attempts = result.attempts, "task completed");
                    for (name, value) in variables {
                        state.variables.insert(name, value);
                    }
                }
                TaskStatus::Failed => {
                    let message = result.error.clone().unwrap_or_default();
                    error!(%task_id, attempts = result.attempts, "task failed: {message}");
                    if !*failed {
                        *failed = true;
                        state.status = ExecutionStatus::Failed;
                        state.error = Some(format!("task '{task_id}' failed: {message}"));
                    }
                }
                TaskStatus::Cancelled => {
                    warn!(%task_id, "task cancelled");
                }
                _ => {}
            }

            state.task_results.insert(task_id, result);
            state.clone()
        };
        self.store.save(&snapshot).await?;
        Ok(())
    }

    async fn finalize(
        &self,
        definition: &WorkflowDefinition,
        statuses: &HashMap<String, TaskStatus>,
        shared: &Arc<RwLock<ExecutionState>>,
        cancelled: bool,
        failed: bool,
    ) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = shared.write().await;

            // Tasks never dispatched: cancelled with the run, or skipped
            // because the execution failed upstream.
            for task in &definition.tasks {
                if statuses[&task.id] != TaskStatus::Pending {
                    continue;
                }
                let record = if cancelled {
                    TaskResult::cancelled_before_start(&task.id)
                } else {
                    let deps_met = task
                        .depends_on
                        .iter()
                        .all(|dep| statuses.get(dep) == Some(&TaskStatus::Completed));
                    let reason = if deps_met {
                        "execution_failed"
                    } else {
                        "dependency_not_met"
                    };
                    TaskResult::skipped(&task.id, reason)
                };
                state.task_results.insert(task.id.clone(), record);
            }

            state.running_tasks.clear();
            state.status = if cancelled {
                ExecutionStatus::Cancelled
            } else if failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Completed
            };
            state.ended_at = Some(Utc::now());
            state.clone()
        };
        self.store.save(&snapshot).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gate evaluation and readiness
// ---------------------------------------------------------------------------

/// Outputs of successfully completed tasks, as seen by expressions.
fn completed_outputs(state: &ExecutionState) -> HashMap<String, Value> {
    state
        .task_results
        .values()
        .filter(|r| r.is_successful())
        .filter_map(|r| r.output.clone().map(|output| (r.task_id.clone(), output)))
        .collect()
}

fn conditions_verdict(
    task: &TaskDefinition,
    view: &ContextView<'_>,
) -> Result<bool, String> {
    for condition in &task.conditions {
        let parsed = expr::parse(condition).map_err(|e| e.to_string())?;
        if !parsed.evaluate_bool(view).map_err(|e| e.to_string())? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Pending tasks that can never run (failed dependency) or whose conditions
/// came out false now that their dependencies are done.
fn evaluate_gates(
    definition: &WorkflowDefinition,
    statuses: &HashMap<String, TaskStatus>,
    state: &ExecutionState,
) -> Vec<GateAction> {
    let results = completed_outputs(state);
    let view = ContextView {
        variables: &state.variables,
        results: &results,
    };

    let mut actions = Vec::new();
    for task in &definition.tasks {
        if statuses[&task.id] != TaskStatus::Pending {
            continue;
        }

        let dep_statuses: Vec<TaskStatus> = task
            .depends_on
            .iter()
            .filter_map(|dep| statuses.get(dep).copied())
            .collect();

        if dep_statuses
            .iter()
            .any(|s| s.is_terminal() && *s != TaskStatus::Completed)
        {
            actions.push(GateAction::Skip {
                task_id: task.id.clone(),
                reason: "dependency_not_met",
            });
            continue;
        }

        let deps_completed = dep_statuses.iter().all(|s| *s == TaskStatus::Completed);
        if deps_completed && !task.conditions.is_empty() {
            match conditions_verdict(task, &view) {
                Ok(true) => {}
                Ok(false) => actions.push(GateAction::Skip {
                    task_id: task.id.clone(),
                    reason: "condition_not_met",
                }),
                Err(error) => actions.push(GateAction::Fail {
                    task_id: task.id.clone(),
                    error,
                }),
            }
        }
    }
    actions
}

/// Pending tasks whose dependencies are all successful and whose conditions
/// hold, in definition order.
fn ready_tasks(
    definition: &WorkflowDefinition,
    statuses: &HashMap<String, TaskStatus>,
    state: &ExecutionState,
) -> Vec<TaskDefinition> {
    let results = completed_outputs(state);
    let view = ContextView {
        variables: &state.variables,
        results: &results,
    };

    definition
        .tasks
        .iter()
        .filter(|task| statuses[&task.id] == TaskStatus::Pending)
        .filter(|task| {
            task.depends_on
                .iter()
                .all(|dep| statuses.get(dep) == Some(&TaskStatus::Completed))
        })
        .filter(|task| conditions_verdict(task, &view).unwrap_or(false))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Single-task runner: validate, invoke, time out, retry
// ---------------------------------------------------------------------------

async fn run_task(
    task: TaskDefinition,
    handler: Option<Arc<dyn TaskHandler>>,
    ctx: HandlerContext,
    default_timeout: Duration,
) -> TaskOutcome {
    let mut result = TaskResult::running(&task.id);
    let mut variables = HashMap::new();

    let Some(handler) = handler else {
        result.fail(
            format!("no handler registered for task type '{}'", task.task_type),
            0,
        );
        return TaskOutcome {
            task_id: task.id,
            result,
            variables,
        };
    };

    if !handler.validate_config(&task.config) {
        result.fail(
            format!("config validation failed for task type '{}'", task.task_type),
            0,
        );
        return TaskOutcome {
            task_id: task.id,
            result,
            variables,
        };
    }

    let timeout = task.timeout().unwrap_or(default_timeout);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        // The timeout bounds a single invocation; on expiry the in-flight
        // future is dropped, which is its cancellation point.
        let invocation = tokio::time::timeout(timeout, handler.execute(&ctx)).await;

        let retryable_error = match invocation {
            Ok(Ok(output)) => {
                variables = output.variables;
                result.complete(output.value, attempts);
                break;
            }
            Ok(Err(HandlerError::Config(message))) => {
                result.fail(format!("invalid task config: {message}"), attempts);
                break;
            }
            Ok(Err(HandlerError::Cancelled)) => {
                result.cancel(attempts);
                break;
            }
            Ok(Err(HandlerError::Execution(message))) => message,
            Err(_elapsed) => format!("timed out after {timeout:?}"),
        };

        if attempts > task.retry.max_retries {
            result.fail(retryable_error, attempts);
            break;
        }

        let delay = task.retry.delay_for(attempts - 1);
        warn!(
            task_id = %task.id,
            attempt = attempts,
            max_retries = task.retry.max_retries,
            "task attempt failed, retrying in {delay:?}: {retryable_error}"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancel.cancelled() => {
                result.cancel(attempts);
                break;
            }
        }
    }

    TaskOutcome {
        task_id: task.id,
        result,
        variables,
    }
}
