//! Per-execution state records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Skipped)
  }
}

/// Mutable state of one node within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
  pub status: NodeStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl NodeState {
  pub(crate) fn pending() -> Self {
    Self {
      status: NodeStatus::Pending,
      error: None,
      started_at: None,
      completed_at: None,
    }
  }

  pub(crate) fn start(&mut self) {
    self.status = NodeStatus::Running;
    self.started_at = Some(Utc::now());
  }

  pub(crate) fn finish(&mut self, status: NodeStatus, error: Option<String>) {
    self.status = status;
    self.error = error;
    self.completed_at = Some(Utc::now());
  }
}

/// Record of one workflow run.
///
/// Owned by the runner while running; read-only once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: ExecutionStatus,
  pub started_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  /// Results of completed nodes, keyed by node id.
  pub results: HashMap<String, serde_json::Value>,
  pub nodes: HashMap<String, NodeState>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl WorkflowExecution {
  pub(crate) fn start<'a>(
    workflow_id: &str,
    node_ids: impl IntoIterator<Item = &'a String>,
  ) -> Self {
    Self {
      execution_id: uuid::Uuid::new_v4().to_string(),
      workflow_id: workflow_id.to_string(),
      status: ExecutionStatus::Running,
      started_at: Utc::now(),
      completed_at: None,
      results: HashMap::new(),
      nodes: node_ids
        .into_iter()
        .map(|id| (id.clone(), NodeState::pending()))
        .collect(),
      error: None,
    }
  }

  pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
    self.nodes.get(node_id).map(|state| state.status)
  }

  /// Node ids with the given status, sorted.
  pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<String> {
    let mut ids: Vec<String> = self
      .nodes
      .iter()
      .filter(|(_, state)| state.status == status)
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }

  pub fn is_terminal(&self) -> bool {
    self.status != ExecutionStatus::Running
  }

  pub(crate) fn complete(&mut self) {
    self.status = ExecutionStatus::Completed;
    self.completed_at = Some(Utc::now());
  }

  pub(crate) fn fail(&mut self, error: String) {
    self.status = ExecutionStatus::Failed;
    self.error = Some(error);
    self.completed_at = Some(Utc::now());
  }
}
