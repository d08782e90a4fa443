use std::collections::HashMap;

use taskloom_config::WorkflowDef;

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::node::{Node, NodeRegistry};

/// A validated workflow ready for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  /// Nodes in declaration order.
  nodes: Vec<Node>,
  index: HashMap<String, usize>,
  graph: Graph,
}

impl Workflow {
  /// Validate a definition and resolve each node's handler by kind.
  pub fn build(def: WorkflowDef, registry: &NodeRegistry) -> Result<Self, WorkflowError> {
    if def.nodes.is_empty() {
      return Err(WorkflowError::Empty {
        workflow_id: def.workflow_id,
      });
    }

    let mut index = HashMap::with_capacity(def.nodes.len());
    for (position, node) in def.nodes.iter().enumerate() {
      if index.insert(node.node_id.clone(), position).is_some() {
        return Err(WorkflowError::DuplicateNode(node.node_id.clone()));
      }
    }

    let mut nodes = Vec::with_capacity(def.nodes.len());
    for node in def.nodes {
      if let Some(dependency) = node.depends_on.iter().find(|d| !index.contains_key(*d)) {
        return Err(WorkflowError::UnknownDependency {
          node_id: node.node_id.clone(),
          dependency: dependency.clone(),
        });
      }

      let handler = registry
        .get(&node.kind)
        .ok_or_else(|| WorkflowError::UnknownKind {
          node_id: node.node_id.clone(),
          kind: node.kind.clone(),
        })?;

      let name = if node.name.is_empty() {
        node.node_id.clone()
      } else {
        node.name
      };

      nodes.push(Node {
        node_id: node.node_id,
        name,
        kind: node.kind,
        depends_on: node.depends_on,
        metadata: node.metadata,
        handler,
      });
    }

    let graph = Graph::new(&nodes);
    let name = if def.name.is_empty() {
      def.workflow_id.clone()
    } else {
      def.name
    };

    Ok(Self {
      workflow_id: def.workflow_id,
      name,
      nodes,
      index,
      graph,
    })
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.index.get(node_id).map(|&i| &self.nodes[i])
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}
