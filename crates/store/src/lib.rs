//! `store` crate — pure persistence layer for execution state.
//!
//! Provides the [`StateStore`] contract (`save`/`load`/`list`), the typed
//! execution-state models, and an in-memory reference backend. Durable
//! backends are external collaborators implementing the same trait; no
//! business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use models::{
    ExecutionState, ExecutionStatus, ExecutionSummary, TaskResult, TaskStatus,
};
pub use traits::StateStore;
