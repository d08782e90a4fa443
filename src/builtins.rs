//! Tools and node kinds available to the command line.

use std::sync::Arc;

use serde_json::Value;
use taskloom_executor::ExecutionEngine;
use taskloom_runtime::ToolNode;
use taskloom_task::{TaskRegistry, TaskResult, task_fn};
use taskloom_workflow::{NodeRegistry, node_fn};

/// `echo` returns its context; `sum` adds up every number in it.
pub fn tools() -> TaskRegistry {
  TaskRegistry::new()
    .with(
      "echo",
      task_fn(|context| async move { Ok(TaskResult::ok(context)) }),
    )
    .with(
      "sum",
      task_fn(|context| async move {
        // Node params carry the task name and settings, not operands.
        let total: f64 = match &context {
          Value::Object(map) => map
            .iter()
            .filter(|(key, _)| key.as_str() != "params")
            .map(|(_, value)| sum_numbers(value))
            .sum(),
          other => sum_numbers(other),
        };
        Ok(TaskResult::ok(Value::from(total)))
      }),
    )
}

/// `passthrough` forwards `metadata.value` or the workflow input, `merge`
/// collects upstream results into one object, and `tool` runs an engine task.
pub fn node_kinds(engine: Arc<ExecutionEngine>) -> NodeRegistry {
  NodeRegistry::new()
    .with(
      "passthrough",
      node_fn(|input| async move {
        Ok(
          input
            .metadata
            .get("value")
            .cloned()
            .unwrap_or_else(|| input.context.input.clone()),
        )
      }),
    )
    .with(
      "merge",
      node_fn(|input| async move { Ok(Value::Object(input.upstream())) }),
    )
    .with("tool", Arc::new(ToolNode::new(engine)))
}

fn sum_numbers(value: &Value) -> f64 {
  match value {
    Value::Number(n) => n.as_f64().unwrap_or(0.0),
    Value::Array(items) => items.iter().map(sum_numbers).sum(),
    Value::Object(map) => map.values().map(sum_numbers).sum(),
    _ => 0.0,
  }
}
