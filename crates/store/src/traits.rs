//! The `StateStore` contract.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ExecutionState, ExecutionStatus, ExecutionSummary};

/// Keyed, durable persistence for execution state.
///
/// `save` is an idempotent overwrite — the engine checkpoints the full
/// snapshot after every task transition. Implementations must support
/// concurrent access for distinct execution ids without interference; a
/// single execution is only ever written by its owning engine instance.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist (or overwrite) the snapshot for `state.execution_id`.
    async fn save(&self, state: &ExecutionState) -> Result<(), StoreError>;

    /// Load the last persisted snapshot for an execution.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when the id was never saved.
    async fn load(&self, execution_id: Uuid) -> Result<ExecutionState, StoreError>;

    /// Summaries of known executions, ordered by start time, optionally
    /// filtered by workflow and/or status.
    async fn list(
        &self,
        workflow_id: Option<Uuid>,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionSummary>, StoreError>;
}
