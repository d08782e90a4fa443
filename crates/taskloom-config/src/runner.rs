use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Workflow runner behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
  /// Optional wall-clock limit for a whole execution.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Keep running branches that do not depend on a failed node.
  pub continue_on_failure: bool,
  /// Number of terminal executions kept for lookup by id.
  pub history_limit: usize,
}

impl RunnerConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      timeout_ms: None,
      continue_on_failure: false,
      history_limit: 100,
    }
  }
}
