use serde::{Deserialize, Serialize};

/// A workflow as declared by a caller, before handlers are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  #[serde(default)]
  pub name: String,
  pub nodes: Vec<NodeDef>,
}

/// A node declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  /// Display name. Falls back to the node id when empty.
  #[serde(default)]
  pub name: String,
  /// Handler lookup key, e.g. "tool" or "merge".
  pub kind: String,
  /// Ids of nodes that must complete before this one starts.
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(default)]
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NodeDef {
  /// Create a node with no dependencies or metadata.
  pub fn new(node_id: impl Into<String>, kind: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      name: String::new(),
      kind: kind.into(),
      depends_on: Vec::new(),
      metadata: serde_json::Map::new(),
    }
  }

  pub fn depends_on<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.metadata.insert(key.into(), value);
    self
  }
}
