//! Built-in task handlers.
//!
//! These cover the generic building blocks every workflow needs; anything
//! domain-specific arrives through external handler registrations.

pub mod condition;
pub mod notification;
pub mod script;
pub mod transform;
pub mod wait;

pub use condition::ConditionHandler;
pub use notification::NotificationHandler;
pub use script::ScriptHandler;
pub use transform::TransformHandler;
pub use wait::WaitHandler;
