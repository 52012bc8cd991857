//! In-memory `StateStore` backend.
//!
//! The reference implementation used by tests and the CLI. Snapshots are
//! cloned on the way in and out, so callers never share mutable state
//! through the store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ExecutionState, ExecutionStatus, ExecutionSummary};
use crate::traits::StateStore;

/// Map-backed store; cheap to clone and share.
#[derive(Clone, Default)]
pub struct MemoryStore {
    executions: Arc<RwLock<HashMap<Uuid, ExecutionState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, state: &ExecutionState) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        executions.insert(state.execution_id, state.clone());
        Ok(())
    }

    async fn load(&self, execution_id: Uuid) -> Result<ExecutionState, StoreError> {
        let executions = self.executions.read().await;
        executions
            .get(&execution_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(
        &self,
        workflow_id: Option<Uuid>,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionSummary>, StoreError> {
        let executions = self.executions.read().await;
        let mut summaries: Vec<ExecutionSummary> = executions
            .values()
            .filter(|state| workflow_id.map(|id| state.workflow_id == id).unwrap_or(true))
            .filter(|state| status.map(|s| state.status == s).unwrap_or(true))
            .map(|state| state.summary())
            .collect();
        summaries.sort_by_key(|summary| summary.started_at);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_for(workflow_id: Uuid) -> ExecutionState {
        let mut variables = HashMap::new();
        variables.insert("env".to_string(), json!("test"));
        ExecutionState::new(Uuid::new_v4(), workflow_id, variables)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryStore::new();
        let state = state_for(Uuid::new_v4());

        store.save(&state).await.unwrap();
        let loaded = store.load(state.execution_id).await.unwrap();

        assert_eq!(loaded.execution_id, state.execution_id);
        assert_eq!(loaded.variables["env"], json!("test"));
    }

    #[tokio::test]
    async fn save_is_an_idempotent_overwrite() {
        let store = MemoryStore::new();
        let mut state = state_for(Uuid::new_v4());

        store.save(&state).await.unwrap();
        state.status = ExecutionStatus::Running;
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();

        assert_eq!(store.len().await, 1);
        let loaded = store.load(state.execution_id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn missing_execution_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load(Uuid::new_v4()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_filters_by_workflow_and_status() {
        let store = MemoryStore::new();
        let workflow_a = Uuid::new_v4();
        let workflow_b = Uuid::new_v4();

        let mut first = state_for(workflow_a);
        first.status = ExecutionStatus::Completed;
        let second = state_for(workflow_a);
        let third = state_for(workflow_b);

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        store.save(&third).await.unwrap();

        let all = store.list(None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let for_a = store.list(Some(workflow_a), None).await.unwrap();
        assert_eq!(for_a.len(), 2);

        let completed = store
            .list(Some(workflow_a), Some(ExecutionStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].execution_id, first.execution_id);
    }

    #[tokio::test]
    async fn list_orders_by_start_time() {
        let store = MemoryStore::new();
        let workflow_id = Uuid::new_v4();

        let mut early = state_for(workflow_id);
        early.started_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let late = state_for(workflow_id);

        // Insert out of order.
        store.save(&late).await.unwrap();
        store.save(&early).await.unwrap();

        let listed = store.list(Some(workflow_id), None).await.unwrap();
        assert_eq!(listed[0].execution_id, early.execution_id);
        assert_eq!(listed[1].execution_id, late.execution_id);
    }

    #[tokio::test]
    async fn concurrent_writers_on_distinct_ids_do_not_interfere() {
        let store = MemoryStore::new();
        let workflow_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let state = state_for(workflow_id);
            handles.push(tokio::spawn(async move {
                store.save(&state).await.unwrap();
                state.execution_id
            }));
        }

        for handle in handles {
            let id = handle.await.unwrap();
            assert!(store.load(id).await.is_ok());
        }
        assert_eq!(store.len().await, 16);
    }
}
