//! Execution events and notifiers for observability.
//!
//! Events are emitted during workflow execution to allow consumers to observe
//! progress, persist state, stream to UIs, etc. Delivery is fire-and-forget:
//! a notifier that cannot deliver never affects the workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  /// A set of ready nodes is about to be dispatched together.
  WaveStarted {
    execution_id: String,
    wave: usize,
    node_ids: Vec<String>,
  },

  /// A node has started executing.
  NodeStarted {
    execution_id: String,
    node_id: String,
  },

  /// A node has completed successfully.
  NodeCompleted {
    execution_id: String,
    node_id: String,
    data: serde_json::Value,
  },

  /// A node has failed.
  NodeFailed {
    execution_id: String,
    node_id: String,
    error: String,
  },

  /// A node will not run because the execution ended before it was ready.
  NodeSkipped {
    execution_id: String,
    node_id: String,
  },

  /// Workflow execution has completed successfully.
  WorkflowCompleted { execution_id: String },

  /// Workflow execution has failed.
  WorkflowFailed { execution_id: String, error: String },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      Self::WorkflowStarted { execution_id, .. }
      | Self::WaveStarted { execution_id, .. }
      | Self::NodeStarted { execution_id, .. }
      | Self::NodeCompleted { execution_id, .. }
      | Self::NodeFailed { execution_id, .. }
      | Self::NodeSkipped { execution_id, .. }
      | Self::WorkflowCompleted { execution_id }
      | Self::WorkflowFailed { execution_id, .. } => execution_id,
    }
  }
}

/// An event as published to a sink: `{topic, type, payload, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
  pub topic: String,
  #[serde(flatten)]
  pub event: ExecutionEvent,
  pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
  pub fn new(topic: impl Into<String>, event: ExecutionEvent) -> Self {
    Self {
      topic: topic.into(),
      event,
      timestamp: Utc::now(),
    }
  }
}

/// Trait for receiving execution events.
///
/// The runner calls `notify` for each event; implementations decide what to
/// do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that wraps events in envelopes and sends them to an unbounded
/// channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the runner. Volume is a few
  // events per node.
  sender: mpsc::UnboundedSender<EventEnvelope>,
  topic: String,
}

impl ChannelNotifier {
  pub const DEFAULT_TOPIC: &'static str = "workflow_events";

  pub fn new(sender: mpsc::UnboundedSender<EventEnvelope>) -> Self {
    Self::with_topic(sender, Self::DEFAULT_TOPIC)
  }

  pub fn with_topic(sender: mpsc::UnboundedSender<EventEnvelope>, topic: impl Into<String>) -> Self {
    Self {
      sender,
      topic: topic.into(),
    }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(EventEnvelope::new(self.topic.clone(), event));
  }
}
