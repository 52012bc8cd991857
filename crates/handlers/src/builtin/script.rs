//! Script handler — constrained expression evaluation over the execution
//! context.
//!
//! No arbitrary code runs here: the `expression` and every `set` entry go
//! through the whitelisted evaluator in [`crate::expr`], which can only read
//! variables and prior results.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::expr::{self, ContextView};
use crate::traits::{HandlerContext, HandlerOutput, TaskHandler};

pub struct ScriptHandler;

impl ScriptHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScriptHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ScriptConfig {
    /// Expression whose value becomes the task output.
    #[serde(default)]
    expression: Option<String>,

    /// Variable updates: name → expression evaluated against the context.
    #[serde(default)]
    set: HashMap<String, String>,
}

impl ScriptConfig {
    fn parse(config: &Value) -> Result<Self, HandlerError> {
        let parsed: ScriptConfig = serde_json::from_value(config.clone())
            .map_err(|e| HandlerError::Config(format!("invalid script config: {e}")))?;
        if parsed.expression.is_none() && parsed.set.is_empty() {
            return Err(HandlerError::Config(
                "script task needs an 'expression' or at least one 'set' entry".to_string(),
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl TaskHandler for ScriptHandler {
    fn task_type(&self) -> &str {
        "script"
    }

    fn validate_config(&self, config: &Value) -> bool {
        let Ok(parsed) = ScriptConfig::parse(config) else {
            return false;
        };
        let exprs = parsed.expression.iter().chain(parsed.set.values());
        exprs.into_iter().all(|e| expr::parse(e).is_ok())
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let config = ScriptConfig::parse(&ctx.config)?;
        let view = ContextView {
            variables: &ctx.variables,
            results: &ctx.results,
        };

        let value = match &config.expression {
            Some(expression) => expr::evaluate_str(expression, &view)
                .map_err(|e| HandlerError::Execution(e.to_string()))?,
            None => Value::Null,
        };

        let mut variables = HashMap::new();
        for (name, expression) in &config.set {
            let evaluated = expr::evaluate_str(expression, &view)
                .map_err(|e| HandlerError::Execution(format!("set '{name}': {e}")))?;
            variables.insert(name.clone(), evaluated);
        }

        Ok(HandlerOutput::with_variables(
            json!({ "value": value }),
            variables,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expression_result_becomes_output() {
        let handler = ScriptHandler::new();
        let ctx = HandlerContext::for_task(
            "calc",
            json!({ "expression": "variables.count >= 2" }),
        )
        .with_variables(serde_json::from_value(json!({ "count": 5 })).unwrap());

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.value["value"], true);
        assert!(output.variables.is_empty());
    }

    #[tokio::test]
    async fn set_entries_become_variable_updates() {
        let handler = ScriptHandler::new();
        let ctx = HandlerContext::for_task(
            "assign",
            json!({ "set": { "passed": "results.check.value == 1", "label": "'done'" } }),
        )
        .with_results(serde_json::from_value(json!({ "check": { "value": 1 } })).unwrap());

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.variables["passed"], json!(true));
        assert_eq!(output.variables["label"], json!("done"));
    }

    #[tokio::test]
    async fn empty_config_is_rejected() {
        let handler = ScriptHandler::new();
        let ctx = HandlerContext::for_task("noop", json!({}));

        let err = handler.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Config(_)));
    }

    #[test]
    fn validate_config_catches_bad_expressions() {
        let handler = ScriptHandler::new();
        assert!(handler.validate_config(&json!({ "expression": "variables.a == 1" })));
        assert!(!handler.validate_config(&json!({ "expression": "nonsense ==" })));
        assert!(!handler.validate_config(&json!({ "set": { "x": "unrooted.path" } })));
    }
}
