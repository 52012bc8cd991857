//! Execution registry — live snapshots of in-flight executions.
//!
//! The engine registers every execution here for its lifetime, sharing the
//! same state handle it mutates, so status queries see task transitions as
//! they happen. Finished executions fall off the registry and are served
//! from the state store instead.

use std::collections::HashMap;
use std::sync::Arc;

use handlers::CancelToken;
use tokio::sync::RwLock;
use uuid::Uuid;

use store::ExecutionState;

/// Shared handle to a running execution.
#[derive(Clone)]
pub(crate) struct LiveExecution {
    pub state: Arc<RwLock<ExecutionState>>,
    pub cancel: CancelToken,
}

/// Registry of currently running executions.
#[derive(Default)]
pub struct ExecutionTracker {
    live: RwLock<HashMap<Uuid, LiveExecution>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn register(&self, execution_id: Uuid, entry: LiveExecution) {
        let mut live = self.live.write().await;
        live.insert(execution_id, entry);
    }

    pub(crate) async fn deregister(&self, execution_id: Uuid) {
        let mut live = self.live.write().await;
        live.remove(&execution_id);
    }

    /// Clone the live snapshot of an active execution, if any.
    pub async fn snapshot(&self, execution_id: Uuid) -> Option<ExecutionState> {
        let entry = {
            let live = self.live.read().await;
            live.get(&execution_id).cloned()
        };
        match entry {
            Some(entry) => Some(entry.state.read().await.clone()),
            None => None,
        }
    }

    /// Trip the cancellation token of an active execution.
    ///
    /// Returns false when the execution is not live (finished or unknown).
    pub async fn cancel(&self, execution_id: Uuid) -> bool {
        let live = self.live.read().await;
        match live.get(&execution_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of executions currently in flight.
    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[tokio::test]
    async fn snapshot_of_unknown_execution_is_none() {
        let tracker = ExecutionTracker::new();
        assert!(tracker.snapshot(Uuid::new_v4()).await.is_none());
        assert!(!tracker.cancel(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn registered_execution_is_visible_until_deregistered() {
        let tracker = ExecutionTracker::new();
        let execution_id = Uuid::new_v4();
        let state = ExecutionState::new(execution_id, Uuid::new_v4(), StdHashMap::new());
        let entry = LiveExecution {
            state: Arc::new(RwLock::new(state)),
            cancel: CancelToken::new(),
        };

        tracker.register(execution_id, entry.clone()).await;
        assert_eq!(tracker.live_count().await, 1);
        assert!(tracker.snapshot(execution_id).await.is_some());

        assert!(tracker.cancel(execution_id).await);
        assert!(entry.cancel.is_cancelled());

        tracker.deregister(execution_id).await;
        assert!(tracker.snapshot(execution_id).await.is_none());
        assert_eq!(tracker.live_count().await, 0);
    }
}
