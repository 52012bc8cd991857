//! Handler-level error type.

use thiserror::Error;

/// Errors returned by a handler's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Execution` — transient failure, retried per the task's retry policy.
/// - `Config`    — the task configuration is unusable; fails immediately,
///   no retry.
/// - `Cancelled` — the handler observed the cancellation token and exited.
#[derive(Debug, Error, Clone)]
pub enum HandlerError {
    /// Invalid or unusable task configuration; no retry is attempted.
    #[error("invalid task config: {0}")]
    Config(String),

    /// Transient execution failure; the engine retries per policy.
    #[error("handler execution failed: {0}")]
    Execution(String),

    /// The handler exited at a cancellation checkpoint.
    #[error("handler cancelled")]
    Cancelled,
}
