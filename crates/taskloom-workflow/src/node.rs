use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use taskloom_task::{HandlerRegistry, TaskError};

/// What a workflow execution has produced so far.
///
/// A fresh snapshot is taken for every wave, so handlers in the same wave
/// see the same results and never observe each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowContext {
  /// The payload the workflow was started with.
  pub input: Value,
  /// Results of completed nodes, keyed by node id.
  pub results: HashMap<String, Value>,
}

impl WorkflowContext {
  pub fn new(input: Value) -> Self {
    Self {
      input,
      results: HashMap::new(),
    }
  }

  pub fn result(&self, node_id: &str) -> Option<&Value> {
    self.results.get(node_id)
  }

  /// `{ "input": .., "results": { node_id: result } }`
  pub fn to_value(&self) -> Value {
    let results: serde_json::Map<String, Value> = self
      .results
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    serde_json::json!({
      "input": self.input,
      "results": results,
    })
  }
}

/// Everything a node handler gets for one run.
#[derive(Debug, Clone)]
pub struct NodeInput {
  pub node_id: String,
  pub name: String,
  /// Ids of the nodes this one depends on, in declaration order.
  pub depends_on: Vec<String>,
  pub context: Arc<WorkflowContext>,
  pub metadata: serde_json::Map<String, Value>,
}

impl NodeInput {
  /// Results of this node's dependencies, keyed by node id.
  pub fn upstream(&self) -> serde_json::Map<String, Value> {
    self
      .depends_on
      .iter()
      .filter_map(|id| self.context.result(id).map(|v| (id.clone(), v.clone())))
      .collect()
  }
}

/// The work behind a node kind.
///
/// The returned value becomes the node's result and is visible to
/// downstream nodes. An `Err` fails the node.
#[async_trait]
pub trait NodeHandler: Send + Sync {
  async fn run(&self, input: NodeInput) -> Result<Value, TaskError>;
}

/// Registry of node handlers keyed by node kind.
pub type NodeRegistry = HandlerRegistry<dyn NodeHandler>;

/// Adapts an async closure into a [`NodeHandler`].
pub struct NodeFn<F> {
  f: F,
}

#[async_trait]
impl<F, Fut> NodeHandler for NodeFn<F>
where
  F: Fn(NodeInput) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
  async fn run(&self, input: NodeInput) -> Result<Value, TaskError> {
    (self.f)(input).await
  }
}

/// Wrap an async closure as a shareable node handler.
pub fn node_fn<F, Fut>(f: F) -> Arc<dyn NodeHandler>
where
  F: Fn(NodeInput) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
  Arc::new(NodeFn { f })
}

/// A validated node with its handler resolved.
#[derive(Clone)]
pub struct Node {
  pub node_id: String,
  pub name: String,
  pub kind: String,
  pub depends_on: Vec<String>,
  pub metadata: serde_json::Map<String, Value>,
  pub handler: Arc<dyn NodeHandler>,
}

impl Node {
  /// Build the handler input for a run against `context`.
  pub fn input(&self, context: Arc<WorkflowContext>) -> NodeInput {
    NodeInput {
      node_id: self.node_id.clone(),
      name: self.name.clone(),
      depends_on: self.depends_on.clone(),
      context,
      metadata: self.metadata.clone(),
    }
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("node_id", &self.node_id)
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("depends_on", &self.depends_on)
      .field("metadata", &self.metadata)
      .finish_non_exhaustive()
  }
}
