//! Wait handler — suspend for a configured duration.
//!
//! The sleep races the cancellation token, so a cancelled execution reclaims
//! a waiting task at the next scheduler poll rather than after the full
//! duration.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::HandlerError;
use crate::traits::{HandlerContext, HandlerOutput, TaskHandler};

pub struct WaitHandler;

impl WaitHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WaitHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WaitConfig {
    /// Duration in seconds (fractional allowed, e.g. 0.5).
    #[serde(default)]
    seconds: Option<f64>,

    /// Duration in milliseconds, added to `seconds` if both are present.
    #[serde(default)]
    milliseconds: Option<u64>,
}

/// Total wait in milliseconds. Waits are capped at one hour.
fn wait_millis(config: &WaitConfig) -> Result<u64, HandlerError> {
    const MAX_WAIT_MS: u64 = 60 * 60 * 1000;

    let mut total: u64 = 0;
    if let Some(seconds) = config.seconds {
        if seconds < 0.0 {
            return Err(HandlerError::Config(
                "wait duration cannot be negative".to_string(),
            ));
        }
        total += (seconds * 1000.0) as u64;
    }
    if let Some(ms) = config.milliseconds {
        total += ms;
    }

    if total > MAX_WAIT_MS {
        return Err(HandlerError::Config(format!(
            "wait of {total}ms exceeds the {MAX_WAIT_MS}ms maximum"
        )));
    }
    Ok(total)
}

#[async_trait]
impl TaskHandler for WaitHandler {
    fn task_type(&self) -> &str {
        "wait"
    }

    fn validate_config(&self, config: &Value) -> bool {
        serde_json::from_value::<WaitConfig>(config.clone())
            .map(|c| wait_millis(&c).is_ok())
            .unwrap_or(false)
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let config: WaitConfig = serde_json::from_value(ctx.config.clone())
            .map_err(|e| HandlerError::Config(format!("invalid wait config: {e}")))?;
        let millis = wait_millis(&config)?;

        if millis > 0 {
            debug!(task_id = %ctx.task_id, millis, "wait task sleeping");
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(millis)) => {}
                _ = ctx.cancel.cancelled() => return Err(HandlerError::Cancelled),
            }
        }

        Ok(HandlerOutput::value(json!({ "waited_ms": millis })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn seconds_and_milliseconds_accumulate() {
        let config = WaitConfig {
            seconds: Some(1.5),
            milliseconds: Some(250),
        };
        assert_eq!(wait_millis(&config).unwrap(), 1750);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let config = WaitConfig {
            seconds: Some(-1.0),
            milliseconds: None,
        };
        assert!(wait_millis(&config).is_err());
    }

    #[test]
    fn over_an_hour_is_rejected() {
        let config = WaitConfig {
            seconds: Some(7200.0),
            milliseconds: None,
        };
        assert!(wait_millis(&config).is_err());
    }

    #[tokio::test]
    async fn waits_roughly_the_configured_duration() {
        let handler = WaitHandler::new();
        let ctx = HandlerContext::for_task("pause", json!({ "milliseconds": 50 }));

        let started = Instant::now();
        let output = handler.execute(&ctx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(output.value["waited_ms"], 50);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let handler = WaitHandler::new();
        let ctx = HandlerContext::for_task("pause", json!({ "seconds": 30 }));
        let cancel = ctx.cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let result = handler.execute(&ctx).await;
        assert!(matches!(result, Err(HandlerError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
