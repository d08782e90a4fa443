//! Runtime errors.

use taskloom_workflow::WorkflowError;

use crate::execution::WorkflowExecution;

/// Errors from creating or running workflows.
///
/// Execution failures carry the terminal [`WorkflowExecution`] so results of
/// the nodes that did complete stay available to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The workflow definition was rejected.
  #[error("invalid workflow: {0}")]
  InvalidWorkflow(#[from] WorkflowError),

  /// No workflow registered under this id.
  #[error("workflow '{workflow_id}' not found")]
  WorkflowNotFound { workflow_id: String },

  /// A node handler failed or panicked.
  #[error("node '{node_id}' failed: {error}")]
  NodeFailed {
    node_id: String,
    error: String,
    execution: Box<WorkflowExecution>,
  },

  /// Nodes remain but none can become ready: a cycle or an unsatisfiable
  /// dependency.
  #[error("workflow cannot make progress; blocked nodes: {}", .blocked.join(", "))]
  UnresolvableGraph {
    blocked: Vec<String>,
    execution: Box<WorkflowExecution>,
  },

  /// The execution exceeded its configured timeout.
  #[error("workflow timed out after {timeout_ms}ms")]
  TimedOut {
    timeout_ms: u64,
    execution: Box<WorkflowExecution>,
  },
}

impl RuntimeError {
  /// The terminal execution record, for failures that happened mid-run.
  pub fn execution(&self) -> Option<&WorkflowExecution> {
    match self {
      Self::NodeFailed { execution, .. }
      | Self::UnresolvableGraph { execution, .. }
      | Self::TimedOut { execution, .. } => Some(&**execution),
      Self::InvalidWorkflow(_) | Self::WorkflowNotFound { .. } => None,
    }
  }
}
