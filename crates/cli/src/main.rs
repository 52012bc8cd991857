//! `relay` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — validate a workflow JSON file and print its execution order.
//! - `run`      — execute a workflow file and print the result as JSON.
//! - `handlers` — list the registered built-in handler types.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use engine::WorkflowEngine;
use handlers::HandlerRegistry;
use store::{MemoryStore, StateStore};

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Declarative workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: std::path::PathBuf,
    },
    /// Execute a workflow definition JSON file once.
    Run {
        /// Path to the workflow JSON file.
        path: std::path::PathBuf,
        /// Variable overrides as key=value pairs; values parse as JSON when
        /// possible, otherwise as strings.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// List the built-in handler types.
    Handlers,
}

/// `key=value` → variable binding; the value side prefers JSON.
fn parse_var(raw: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("--var expects KEY=VALUE, got '{raw}'");
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn load_definition(path: &std::path::Path) -> anyhow::Result<engine::WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let document: Value = serde_json::from_str(&content).context("invalid JSON")?;
    Ok(engine::load(document)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let definition = match load_definition(&path) {
                Ok(definition) => definition,
                Err(e) => {
                    eprintln!("❌ Validation failed: {e:#}");
                    std::process::exit(1);
                }
            };
            let order = engine::validate_graph(&definition.tasks)?;
            println!("✅ Workflow '{}' is valid. Execution order: {order:?}", definition.name);
        }

        Command::Run { path, vars } => {
            let definition = load_definition(&path)?;
            let mut overrides = HashMap::new();
            for var in &vars {
                let (key, value) = parse_var(var)?;
                overrides.insert(key, value);
            }

            let registry = Arc::new(HandlerRegistry::with_builtins());
            let store = Arc::new(MemoryStore::new()) as Arc<dyn StateStore>;
            let workflow_engine = WorkflowEngine::new(registry, store);

            info!("executing workflow '{}'", definition.name);
            let state = workflow_engine.execute(&definition, overrides).await?;

            println!("{}", serde_json::to_string_pretty(&state)?);
            if state.status != store::ExecutionStatus::Completed {
                std::process::exit(1);
            }
        }

        Command::Handlers => {
            let registry = HandlerRegistry::with_builtins();
            for type_name in registry.list() {
                println!("{type_name}");
            }
        }
    }

    Ok(())
}
