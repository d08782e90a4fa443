use std::collections::{HashMap, HashSet, VecDeque};

use crate::Node;

/// Graph structure for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> list of upstream node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes with no dependencies, in declaration order.
  entry_points: Vec<String>,
}

impl Graph {
  /// Build a graph from nodes and their declared dependencies.
  pub fn new(nodes: &[Node]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node in nodes {
      adjacency.entry(node.node_id.clone()).or_default();
      reverse_adjacency.entry(node.node_id.clone()).or_default();
    }

    for node in nodes {
      for dependency in &node.depends_on {
        adjacency
          .entry(dependency.clone())
          .or_default()
          .push(node.node_id.clone());
        reverse_adjacency
          .entry(node.node_id.clone())
          .or_default()
          .push(dependency.clone());
      }
    }

    let entry_points = nodes
      .iter()
      .filter(|node| node.depends_on.is_empty())
      .map(|node| node.node_id.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  /// Get entry points (nodes with no dependencies).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every node reachable downstream of `node_id`, excluding itself unless
  /// it sits on a cycle.
  pub fn descendants(&self, node_id: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&str> = self.downstream(node_id).iter().map(String::as_str).collect();

    while let Some(next) = queue.pop_front() {
      if seen.insert(next.to_string()) {
        queue.extend(self.downstream(next).iter().map(String::as_str));
      }
    }
    seen
  }
}
