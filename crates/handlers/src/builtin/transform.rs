//! Transform handler — declarative map/filter over a referenced collection.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::expr::{self, ContextView};
use crate::traits::{HandlerContext, HandlerOutput, TaskHandler};

pub struct TransformHandler;

impl TransformHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TransformHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Map,
    Filter,
}

#[derive(Debug, Deserialize)]
struct TransformConfig {
    /// Path to the input collection, e.g. `variables.orders` or
    /// `results.fetch.items`.
    source: String,

    operation: Operation,

    /// Dot-path into each item. For `filter` the field under test; for `map`
    /// the field to project. Empty means the item itself.
    #[serde(default)]
    field: Option<String>,

    /// Filter comparison operator: equals, not_equals, gt, lt, gte, lte,
    /// contains.
    #[serde(default)]
    operator: Option<String>,

    /// Filter comparison operand.
    #[serde(default)]
    value: Option<Value>,

    /// Variable to assign the transformed collection to.
    #[serde(default)]
    assign: Option<String>,
}

#[async_trait]
impl TaskHandler for TransformHandler {
    fn task_type(&self) -> &str {
        "transform"
    }

    fn validate_config(&self, config: &Value) -> bool {
        serde_json::from_value::<TransformConfig>(config.clone()).is_ok()
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let config: TransformConfig = serde_json::from_value(ctx.config.clone())
            .map_err(|e| HandlerError::Config(format!("invalid transform config: {e}")))?;

        let view = ContextView {
            variables: &ctx.variables,
            results: &ctx.results,
        };
        let source = expr::resolve_path(&config.source, &view)
            .map_err(|e| HandlerError::Config(format!("bad source path: {e}")))?;
        let Value::Array(items) = source else {
            return Err(HandlerError::Execution(format!(
                "source '{}' is not a collection",
                config.source
            )));
        };

        let transformed: Vec<Value> = match config.operation {
            Operation::Filter => {
                let operator = config.operator.as_deref().unwrap_or("equals");
                let operand = config.value.clone().unwrap_or(Value::Null);
                let mut kept = Vec::new();
                for item in items {
                    let left = project(&item, config.field.as_deref());
                    if compare(&left, operator, &operand)? {
                        kept.push(item);
                    }
                }
                kept
            }
            Operation::Map => items
                .into_iter()
                .map(|item| project(&item, config.field.as_deref()))
                .collect(),
        };

        let count = transformed.len();
        let collection = Value::Array(transformed);

        let mut output = HandlerOutput::value(json!({
            "items": collection.clone(),
            "count": count,
        }));
        if let Some(assign) = config.assign {
            output.variables.insert(assign, collection);
        }
        Ok(output)
    }
}

/// Pull a dot-path field out of an item; `None`/empty path is the item.
fn project(item: &Value, field: Option<&str>) -> Value {
    let Some(field) = field.filter(|f| !f.is_empty()) else {
        return item.clone();
    };
    let mut current = item;
    for segment in field.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            Value::Array(entries) => {
                let Some(next) = segment.parse::<usize>().ok().and_then(|i| entries.get(i)) else {
                    return Value::Null;
                };
                current = next;
            }
            _ => return Value::Null,
        }
    }
    current.clone()
}

fn compare(left: &Value, operator: &str, right: &Value) -> Result<bool, HandlerError> {
    match operator {
        "equals" => Ok(left == right),
        "not_equals" => Ok(left != right),
        "contains" => match left {
            Value::String(s) => Ok(right.as_str().map(|n| s.contains(n)).unwrap_or(false)),
            Value::Array(items) => Ok(items.contains(right)),
            _ => Ok(false),
        },
        "gt" | "lt" | "gte" | "lte" => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return Err(HandlerError::Execution(format!(
                    "operator '{operator}' requires numeric operands"
                )));
            };
            Ok(match operator {
                "gt" => l > r,
                "lt" => l < r,
                "gte" => l >= r,
                "lte" => l <= r,
                _ => false,
            })
        }
        other => Err(HandlerError::Config(format!(
            "unsupported filter operator '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx_with_orders() -> HandlerContext {
        let variables: HashMap<String, Value> = serde_json::from_value(json!({
            "orders": [
                { "id": 1, "status": "open",   "total": 40 },
                { "id": 2, "status": "closed", "total": 90 },
                { "id": 3, "status": "open",   "total": 15 },
            ]
        }))
        .unwrap();
        HandlerContext::for_task("reshape", Value::Null).with_variables(variables)
    }

    #[tokio::test]
    async fn filter_keeps_matching_items() {
        let handler = TransformHandler::new();
        let mut ctx = ctx_with_orders();
        ctx.config = json!({
            "source": "variables.orders",
            "operation": "filter",
            "field": "status",
            "operator": "equals",
            "value": "open",
        });

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.value["count"], 2);
        assert_eq!(output.value["items"][0]["id"], 1);
        assert_eq!(output.value["items"][1]["id"], 3);
    }

    #[tokio::test]
    async fn numeric_filter_operators() {
        let handler = TransformHandler::new();
        let mut ctx = ctx_with_orders();
        ctx.config = json!({
            "source": "variables.orders",
            "operation": "filter",
            "field": "total",
            "operator": "gte",
            "value": 40,
        });

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.value["count"], 2);
    }

    #[tokio::test]
    async fn map_projects_a_field_and_assigns() {
        let handler = TransformHandler::new();
        let mut ctx = ctx_with_orders();
        ctx.config = json!({
            "source": "variables.orders",
            "operation": "map",
            "field": "id",
            "assign": "order_ids",
        });

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(output.value["items"], json!([1, 2, 3]));
        assert_eq!(output.variables["order_ids"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn non_collection_source_fails() {
        let handler = TransformHandler::new();
        let mut ctx = ctx_with_orders();
        ctx.config = json!({
            "source": "variables.orders.0.id",
            "operation": "map",
        });

        assert!(matches!(
            handler.execute(&ctx).await,
            Err(HandlerError::Execution(_))
        ));
    }

    #[tokio::test]
    async fn unknown_operator_is_a_config_error() {
        let handler = TransformHandler::new();
        let mut ctx = ctx_with_orders();
        ctx.config = json!({
            "source": "variables.orders",
            "operation": "filter",
            "field": "status",
            "operator": "matches",
            "value": "open",
        });

        assert!(matches!(
            handler.execute(&ctx).await,
            Err(HandlerError::Config(_))
        ));
    }
}
