//! `handlers` crate — the `TaskHandler` trait, the handler registry, and the
//! built-in handler implementations.
//!
//! Every handler — built-in and external alike — must implement
//! [`TaskHandler`]. The engine crate dispatches execution through this trait
//! object and never knows a task's business logic.

pub mod builtin;
pub mod cancel;
pub mod error;
pub mod expr;
pub mod mock;
pub mod registry;
pub mod traits;

pub use cancel::CancelToken;
pub use error::HandlerError;
pub use registry::HandlerRegistry;
pub use traits::{HandlerContext, HandlerOutput, TaskHandler};
