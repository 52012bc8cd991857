//! Workflow scheduler — time- and event-based triggers.
//!
//! Schedules are registered against workflows the scheduler knows about and
//! evaluated by a background loop ticking once per second. Due cron
//! schedules start executions fire-and-forget: the loop never blocks on a
//! run completing. `stop()` guarantees no new firings after it returns but
//! does not touch in-flight executions; a later `start()` resumes with due
//! times recomputed from now, so firings missed while stopped are skipped
//! rather than replayed.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::executor::WorkflowEngine;
use crate::models::{Trigger, WorkflowDefinition};

/// One registered trigger for a workflow.
struct ScheduleEntry {
    workflow_id: Uuid,
    trigger: Trigger,
    /// Parsed expression for cron triggers; `None` for event triggers.
    cron: Option<CronSchedule>,
    overrides: HashMap<String, Value>,
    next_due: Option<DateTime<Utc>>,
}

/// Manages scheduled workflow executions.
pub struct Scheduler {
    engine: Arc<WorkflowEngine>,
    workflows: Arc<RwLock<HashMap<Uuid, Arc<WorkflowDefinition>>>>,
    schedules: Arc<RwLock<HashMap<Uuid, ScheduleEntry>>>,
    /// Stop signal + handle of the running tick loop, if any.
    loop_task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            schedules: Arc::new(RwLock::new(HashMap::new())),
            loop_task: Mutex::new(None),
        }
    }

    /// Make a workflow definition schedulable.
    pub async fn add_workflow(&self, definition: WorkflowDefinition) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(definition.id, Arc::new(definition));
    }

    /// Register a trigger for a workflow.
    ///
    /// Multiple independent schedules per workflow are allowed.
    ///
    /// # Errors
    /// - [`EngineError::UnknownWorkflow`] when the workflow was never added.
    /// - [`EngineError::InvalidTrigger`] when a cron expression does not
    ///   parse — registration fails explicitly, never silently.
    pub async fn schedule(
        &self,
        workflow_id: Uuid,
        trigger: Trigger,
        overrides: Option<HashMap<String, Value>>,
    ) -> Result<Uuid, EngineError> {
        {
            let workflows = self.workflows.read().await;
            if !workflows.contains_key(&workflow_id) {
                return Err(EngineError::UnknownWorkflow(workflow_id));
            }
        }

        let cron = match &trigger {
            Trigger::Cron { expression } => {
                let normalized = normalize_cron(expression);
                let schedule = CronSchedule::from_str(&normalized).map_err(|e| {
                    EngineError::InvalidTrigger {
                        expression: expression.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Some(schedule)
            }
            Trigger::Event { .. } => None,
        };

        let next_due = cron.as_ref().and_then(|s| s.upcoming(Utc).next());
        let schedule_id = Uuid::new_v4();

        {
            let mut schedules = self.schedules.write().await;
            schedules.insert(
                schedule_id,
                ScheduleEntry {
                    workflow_id,
                    trigger: trigger.clone(),
                    cron,
                    overrides: overrides.unwrap_or_default(),
                    next_due,
                },
            );
        }

        info!(%schedule_id, %workflow_id, ?trigger, "schedule registered");
        Ok(schedule_id)
    }

    /// Remove a schedule. Returns false when the id is unknown.
    pub async fn unschedule(&self, schedule_id: Uuid) -> bool {
        let mut schedules = self.schedules.write().await;
        let removed = schedules.remove(&schedule_id).is_some();
        if removed {
            info!(%schedule_id, "schedule removed");
        }
        removed
    }

    /// Number of registered schedules.
    pub async fn schedule_count(&self) -> usize {
        self.schedules.read().await.len()
    }

    /// Start the background tick loop. Idempotent.
    pub async fn start(&self) {
        let mut loop_task = self.loop_task.lock().await;
        if loop_task.is_some() {
            return;
        }

        // Recompute due times from now so firings missed while stopped are
        // skipped, not replayed in a burst.
        {
            let now = Utc::now();
            let mut schedules = self.schedules.write().await;
            for entry in schedules.values_mut() {
                if let Some(cron) = &entry.cron {
                    entry.next_due = cron.after(&now).next();
                }
            }
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        let workflows = Arc::clone(&self.workflows);
        let schedules = Arc::clone(&self.schedules);

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tick.tick() => {
                        fire_due_schedules(&engine, &workflows, &schedules).await;
                    }
                }
            }
        });

        *loop_task = Some((stop_tx, handle));
        info!("scheduler started");
    }

    /// Stop the tick loop and wait for it to exit.
    ///
    /// No new firings happen after this returns; executions already started
    /// keep running.
    pub async fn stop(&self) {
        let task = {
            let mut loop_task = self.loop_task.lock().await;
            loop_task.take()
        };
        if let Some((stop_tx, handle)) = task {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                warn!("scheduler loop ended abnormally: {e}");
            }
            info!("scheduler stopped");
        }
    }

    /// Fire every schedule registered for the named event.
    ///
    /// Returns the number of executions started. Works whether or not the
    /// tick loop is running — events are pushed, not polled.
    pub async fn fire_event(&self, name: &str) -> usize {
        let matching: Vec<(Uuid, HashMap<String, Value>)> = {
            let schedules = self.schedules.read().await;
            schedules
                .values()
                .filter(|entry| {
                    matches!(&entry.trigger, Trigger::Event { name: n } if n == name)
                })
                .map(|entry| (entry.workflow_id, entry.overrides.clone()))
                .collect()
        };

        let mut fired = 0;
        for (workflow_id, overrides) in matching {
            let definition = {
                let workflows = self.workflows.read().await;
                workflows.get(&workflow_id).cloned()
            };
            if let Some(definition) = definition {
                spawn_execution(Arc::clone(&self.engine), definition, overrides, "event");
                fired += 1;
            }
        }

        if fired > 0 {
            info!(event = name, fired, "event trigger fired");
        }
        fired
    }
}

/// Accept classic five-field expressions by prepending a seconds field;
/// six/seven-field expressions (second resolution) pass through.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// One tick: start every cron schedule that has come due.
async fn fire_due_schedules(
    engine: &Arc<WorkflowEngine>,
    workflows: &Arc<RwLock<HashMap<Uuid, Arc<WorkflowDefinition>>>>,
    schedules: &Arc<RwLock<HashMap<Uuid, ScheduleEntry>>>,
) {
    let now = Utc::now();
    let mut due: Vec<(Uuid, HashMap<String, Value>)> = Vec::new();

    {
        let mut schedules = schedules.write().await;
        for entry in schedules.values_mut() {
            let Some(cron) = &entry.cron else { continue };
            let Some(next_due) = entry.next_due else { continue };
            if next_due <= now {
                due.push((entry.workflow_id, entry.overrides.clone()));
                entry.next_due = cron.after(&now).next();
            }
        }
    }

    for (workflow_id, overrides) in due {
        let definition = {
            let workflows = workflows.read().await;
            workflows.get(&workflow_id).cloned()
        };
        match definition {
            Some(definition) => {
                spawn_execution(Arc::clone(engine), definition, overrides, "cron")
            }
            None => error!(%workflow_id, "scheduled workflow no longer registered"),
        }
    }
}

/// Fire-and-forget: the scheduler never blocks on an execution completing.
fn spawn_execution(
    engine: Arc<WorkflowEngine>,
    definition: Arc<WorkflowDefinition>,
    overrides: HashMap<String, Value>,
    source: &'static str,
) {
    tokio::spawn(async move {
        info!(workflow = %definition.name, source, "trigger firing");
        match engine.execute(&definition, overrides).await {
            Ok(state) => info!(
                workflow = %definition.name,
                execution_id = %state.execution_id,
                status = %state.status,
                "triggered execution finished"
            ),
            Err(e) => error!(workflow = %definition.name, "triggered execution failed: {e}"),
        }
    });
}
