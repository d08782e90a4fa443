mod builtins;

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskloom_config::{EngineConfig, RunnerConfig, WorkflowDef, load_json};
use taskloom_executor::ExecutionEngine;
use taskloom_runtime::WorkflowRunner;

/// Taskloom - a task execution engine and workflow DAG runner
#[derive(Parser)]
#[command(name = "taskloom")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the settings file (default: ~/.taskloom/engine.json if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow, a task, or a staged pipeline
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run an entire workflow
  Workflow {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a single built-in task
  Task {
    /// The task name, e.g. "echo" or "sum"
    name: String,

    /// Skip the result cache
    #[arg(long)]
    no_cache: bool,
  },

  /// Run stages of built-in tasks, feeding results forward
  Stages {
    /// Path to a JSON file holding a list of stages, each a list of task names
    stages_file: PathBuf,
  },
}

/// Contents of the settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
  engine: EngineConfig,
  runner: RunnerConfig,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = load_settings(cli.config)?;

  match cli.command {
    Some(Commands::Run { target }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async {
        match target {
          RunTarget::Workflow { workflow_file } => run_workflow(workflow_file, settings).await,
          RunTarget::Task { name, no_cache } => run_task(name, !no_cache, settings).await,
          RunTarget::Stages { stages_file } => run_stages(stages_file, settings).await,
        }
      })?;
    }
    None => {
      println!("taskloom - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
  if let Some(path) = path {
    return load_json(&path).with_context(|| format!("failed to load settings: {}", path.display()));
  }

  let default_path = dirs::home_dir().map(|home| home.join(".taskloom").join("engine.json"));
  match default_path {
    Some(path) if path.exists() => {
      load_json(&path).with_context(|| format!("failed to load settings: {}", path.display()))
    }
    _ => Ok(Settings::default()),
  }
}

fn start_engine(config: EngineConfig) -> Result<Arc<ExecutionEngine>> {
  let engine = ExecutionEngine::new(config, builtins::tools());
  engine
    .initialize()
    .context("failed to start execution engine")?;
  Ok(Arc::new(engine))
}

async fn run_workflow(workflow_file: PathBuf, settings: Settings) -> Result<()> {
  let workflow_def: WorkflowDef = load_json(&workflow_file)
    .with_context(|| format!("failed to load workflow file: {}", workflow_file.display()))?;
  let workflow_id = workflow_def.workflow_id.clone();
  info!(
    workflow_id = %workflow_id,
    nodes = workflow_def.nodes.len(),
    "workflow loaded"
  );

  let payload = read_payload_from_stdin()?;

  let engine = start_engine(settings.engine)?;
  let runner = WorkflowRunner::new(settings.runner, builtins::node_kinds(engine.clone()));
  runner
    .create_workflow(workflow_def)
    .context("failed to create workflow")?;

  let outcome = runner.execute(&workflow_id, payload).await;
  engine.shutdown().await;

  let execution = match outcome {
    Ok(execution) => execution,
    Err(e) => {
      // Still show what did complete.
      if let Some(execution) = e.execution() {
        println!("{}", serde_json::to_string_pretty(execution)?);
      }
      return Err(anyhow::Error::new(e).context("workflow execution failed"));
    }
  };

  eprintln!("Execution completed: {}", execution.execution_id);
  println!("{}", serde_json::to_string_pretty(&execution.results)?);

  Ok(())
}

async fn run_task(name: String, use_cache: bool, settings: Settings) -> Result<()> {
  let payload = read_payload_from_stdin()?;

  let engine = start_engine(settings.engine)?;
  let outcome = engine.execute(&name, payload, use_cache).await;
  engine.shutdown().await;

  let result = outcome.with_context(|| format!("failed to run task '{}'", name))?;
  println!("{}", serde_json::to_string_pretty(&result)?);

  if !result.success {
    anyhow::bail!("task '{}' failed", name);
  }
  Ok(())
}

async fn run_stages(stages_file: PathBuf, settings: Settings) -> Result<()> {
  let stages: Vec<Vec<String>> = load_json(&stages_file)
    .with_context(|| format!("failed to load stages file: {}", stages_file.display()))?;

  let payload = read_payload_from_stdin()?;

  let engine = start_engine(settings.engine)?;
  let outcome = engine.execute_staged(&stages, payload).await;
  engine.shutdown().await;

  let staged = outcome.context("staged execution failed")?;
  println!("{}", serde_json::to_string_pretty(&staged)?);

  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
