//! Bridge from workflow nodes to engine tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_executor::ExecutionEngine;
use taskloom_task::TaskError;
use taskloom_workflow::{NodeHandler, NodeInput};

/// Metadata key naming the engine task a tool node runs.
pub const TASK_KEY: &str = "task";
/// Optional metadata flag; `false` bypasses the result cache.
pub const USE_CACHE_KEY: &str = "use_cache";

/// A node kind that runs an [`ExecutionEngine`] task.
///
/// The task receives `{ "input": <workflow input>, "upstream": { dep: result },
/// "params": <node metadata> }`. A failed task result fails the node.
#[derive(Clone)]
pub struct ToolNode {
  engine: Arc<ExecutionEngine>,
}

impl ToolNode {
  pub fn new(engine: Arc<ExecutionEngine>) -> Self {
    Self { engine }
  }
}

#[async_trait]
impl NodeHandler for ToolNode {
  async fn run(&self, input: NodeInput) -> Result<Value, TaskError> {
    let task_name = input
      .metadata
      .get(TASK_KEY)
      .and_then(Value::as_str)
      .ok_or_else(|| {
        TaskError::invalid_input(format!(
          "node '{}' has no '{}' in its metadata",
          input.node_id, TASK_KEY
        ))
      })?;
    let use_cache = input
      .metadata
      .get(USE_CACHE_KEY)
      .and_then(Value::as_bool)
      .unwrap_or(true);

    let context = json!({
      "input": input.context.input,
      "upstream": input.upstream(),
      "params": input.metadata,
    });

    let result = self
      .engine
      .execute(task_name, context, use_cache)
      .await
      .map_err(|e| TaskError::failed(e.to_string()))?;

    if result.success {
      Ok(result.data)
    } else {
      Err(TaskError::failed(
        result
          .error
          .unwrap_or_else(|| format!("task '{}' failed", task_name)),
      ))
    }
  }
}
