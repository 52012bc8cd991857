//! Handler registry — maps task-type names to handler implementations.
//!
//! Process-scoped lifecycle: built-ins are populated at startup via
//! [`HandlerRegistry::with_builtins`], later registrations may override a
//! type name (last registration wins, which is how instrumentation wrappers
//! get in). Reads are concurrent; registrations are serialized by the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::builtin::{
    ConditionHandler, NotificationHandler, ScriptHandler, TransformHandler, WaitHandler,
};
use crate::traits::TaskHandler;

/// Registry of available task types.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry populated with the built-in handlers.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register_default(Arc::new(ScriptHandler::new()));
        registry.register_default(Arc::new(ConditionHandler::new()));
        registry.register_default(Arc::new(WaitHandler::new()));
        registry.register_default(Arc::new(TransformHandler::new()));
        registry.register_default(Arc::new(NotificationHandler::new()));
        registry
    }

    /// Register a handler under an explicit type name.
    ///
    /// The last registration for a name wins.
    pub fn register(&self, type_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        handlers.insert(type_name.into(), handler);
    }

    /// Register a handler under its own `task_type` name.
    pub fn register_default(&self, handler: Arc<dyn TaskHandler>) {
        let type_name = handler.task_type().to_string();
        self.register(type_name, handler);
    }

    /// Look up a handler by type name.
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read().expect("registry lock poisoned");
        handlers.get(type_name).cloned()
    }

    /// Check whether a type name is registered.
    pub fn has(&self, type_name: &str) -> bool {
        let handlers = self.handlers.read().expect("registry lock poisoned");
        handlers.contains_key(type_name)
    }

    /// List all registered type names.
    pub fn list(&self) -> Vec<String> {
        let handlers = self.handlers.read().expect("registry lock poisoned");
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
