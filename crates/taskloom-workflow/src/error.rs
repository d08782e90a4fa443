use thiserror::Error;

/// Reasons a workflow definition is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
  #[error("workflow '{workflow_id}' has no nodes")]
  Empty { workflow_id: String },

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("node '{node_id}' has unknown kind '{kind}'")]
  UnknownKind { node_id: String, kind: String },

  #[error("node '{node_id}' depends on unknown node '{dependency}'")]
  UnknownDependency { node_id: String, dependency: String },
}
