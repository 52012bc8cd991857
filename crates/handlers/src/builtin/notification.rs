//! Notification handler — renders and records a notification descriptor.
//!
//! Delivery is an external collaborator's job: the descriptor lands in the
//! task output, where an outboard dispatcher (or a registry override wrapping
//! this handler) picks it up.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::HandlerError;
use crate::traits::{HandlerContext, HandlerOutput, TaskHandler};

pub struct NotificationHandler;

impl NotificationHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotificationHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn default_severity() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
struct NotificationConfig {
    /// Logical channel name, e.g. "ops-alerts".
    channel: String,

    /// Message body; `{{name}}` placeholders are filled from variables.
    message: String,

    #[serde(default = "default_severity")]
    severity: String,
}

/// Substitute `{{name}}` placeholders with execution variables.
fn render(template: &str, ctx: &HandlerContext) -> String {
    let mut rendered = template.to_string();
    for (name, value) in &ctx.variables {
        let placeholder = format!("{{{{{name}}}}}");
        if rendered.contains(&placeholder) {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
    }
    rendered
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    fn task_type(&self) -> &str {
        "notification"
    }

    fn validate_config(&self, config: &Value) -> bool {
        serde_json::from_value::<NotificationConfig>(config.clone()).is_ok()
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let config: NotificationConfig = serde_json::from_value(ctx.config.clone())
            .map_err(|e| HandlerError::Config(format!("invalid notification config: {e}")))?;

        let message = render(&config.message, ctx);

        info!(
            channel = %config.channel,
            severity = %config.severity,
            execution_id = %ctx.execution_id,
            "notification recorded: {message}"
        );

        Ok(HandlerOutput::value(json!({
            "channel": config.channel,
            "severity": config.severity,
            "message": message,
            "recorded_at": Utc::now().to_rfc3339(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholders_render_from_variables() {
        let handler = NotificationHandler::new();
        let ctx = HandlerContext::for_task(
            "alert",
            json!({
                "channel": "ops",
                "message": "deploy {{release}} finished with {{failures}} failures",
            }),
        )
        .with_variables(
            serde_json::from_value(json!({ "release": "v1.4", "failures": 0 })).unwrap(),
        );

        let output = handler.execute(&ctx).await.unwrap();
        assert_eq!(
            output.value["message"],
            "deploy v1.4 finished with 0 failures"
        );
        assert_eq!(output.value["severity"], "info");
        assert_eq!(output.value["channel"], "ops");
    }

    #[tokio::test]
    async fn missing_channel_is_a_config_error() {
        let handler = NotificationHandler::new();
        let ctx = HandlerContext::for_task("alert", json!({ "message": "hi" }));

        assert!(matches!(
            handler.execute(&ctx).await,
            Err(HandlerError::Config(_))
        ));
    }
}
