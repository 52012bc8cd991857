//! Typed error type for the store crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(String),
}
