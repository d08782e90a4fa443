//! Taskloom Workflow
//!
//! The validated form of a [`WorkflowDef`](taskloom_config::WorkflowDef).
//! Building a [`Workflow`] checks the graph and resolves every node's kind to
//! a [`NodeHandler`] from a [`NodeRegistry`], so nothing is looked up once
//! execution starts.
//!
//! Compared to the definition:
//! - node ids are unique and every dependency names a node in the graph
//! - each node carries its handler
//! - upstream and downstream adjacency is precomputed in a [`Graph`]
//!
//! Cycles are not rejected here. A cycle leaves no node ready to run, which
//! the runner reports when the workflow executes.

mod error;
mod graph;
mod node;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{Node, NodeFn, NodeHandler, NodeInput, NodeRegistry, WorkflowContext, node_fn};
pub use workflow::Workflow;
