//! Condition handler — boolean branching marker.
//!
//! Evaluates one expression and records which branch was taken. Downstream
//! tasks gate on the marker through their own `conditions`, e.g.
//! `results.gate.branch == 'true'`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::expr::{self, ContextView};
use crate::traits::{HandlerContext, HandlerOutput, TaskHandler};

pub struct ConditionHandler;

impl ConditionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConditionHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    expression: String,
}

#[async_trait]
impl TaskHandler for ConditionHandler {
    fn task_type(&self) -> &str {
        "condition"
    }

    fn validate_config(&self, config: &Value) -> bool {
        serde_json::from_value::<ConditionConfig>(config.clone())
            .map(|c| expr::parse(&c.expression).is_ok())
            .unwrap_or(false)
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let config: ConditionConfig = serde_json::from_value(ctx.config.clone())
            .map_err(|e| HandlerError::Config(format!("invalid condition config: {e}")))?;

        let view = ContextView {
            variables: &ctx.variables,
            results: &ctx.results,
        };
        let parsed = expr::parse(&config.expression)
            .map_err(|e| HandlerError::Config(e.to_string()))?;
        let result = parsed
            .evaluate_bool(&view)
            .map_err(|e| HandlerError::Execution(e.to_string()))?;

        Ok(HandlerOutput::value(json!({
            "result": result,
            "branch": if result { "true" } else { "false" },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn true_expression_selects_true_branch() {
        let handler = ConditionHandler::new();
        let ctx = HandlerContext::for_task(
            "gate",
            json!({ "expression": "variables.level > 10" }),
        )
        .with_variables(serde_json::from_value(json!({ "level": 42 })).unwrap());

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.value["result"], true);
        assert_eq!(output.value["branch"], "true");
    }

    #[tokio::test]
    async fn false_expression_selects_false_branch() {
        let handler = ConditionHandler::new();
        let ctx = HandlerContext::for_task(
            "gate",
            json!({ "expression": "variables.level > 10" }),
        )
        .with_variables(serde_json::from_value(json!({ "level": 3 })).unwrap());

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.value["branch"], "false");
    }

    #[tokio::test]
    async fn missing_expression_is_a_config_error() {
        let handler = ConditionHandler::new();
        let ctx = HandlerContext::for_task("gate", json!({}));

        assert!(matches!(
            handler.execute(&ctx).await,
            Err(HandlerError::Config(_))
        ));
    }

    #[test]
    fn validate_config_rejects_unparseable_expressions() {
        let handler = ConditionHandler::new();
        assert!(handler.validate_config(&json!({ "expression": "variables.x == 1" })));
        assert!(!handler.validate_config(&json!({ "expression": "&&" })));
        assert!(!handler.validate_config(&json!({ "other": true })));
    }
}
