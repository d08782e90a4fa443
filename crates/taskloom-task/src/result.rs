use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Outcome of one task invocation.
///
/// Failure is carried in the value rather than as an `Err` so that batch and
/// staged callers get one slot per request and inspect `success` themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
  pub success: bool,
  #[serde(default)]
  pub data: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl TaskResult {
  pub fn ok(data: serde_json::Value) -> Self {
    Self {
      success: true,
      data,
      error: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      success: false,
      data: serde_json::Value::Null,
      error: Some(error.into()),
    }
  }
}

impl From<Result<TaskResult, TaskError>> for TaskResult {
  fn from(result: Result<TaskResult, TaskError>) -> Self {
    match result {
      Ok(result) => result,
      Err(e) => TaskResult::failed(e.to_string()),
    }
  }
}
