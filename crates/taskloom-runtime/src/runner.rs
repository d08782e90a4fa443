//! Workflow registry and wave-by-wave execution.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use taskloom_config::{RunnerConfig, WorkflowDef};
use taskloom_task::TaskError;
use taskloom_workflow::{Node, NodeRegistry, Workflow, WorkflowContext};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::error::RuntimeError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::execution::{NodeStatus, WorkflowExecution};

/// Owns validated workflows and runs them.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `WorkflowRunner::new()` for no-op notifications, or
/// `WorkflowRunner::with_notifier()` to observe events.
pub struct WorkflowRunner<N: ExecutionNotifier = NoopNotifier> {
  config: RunnerConfig,
  registry: NodeRegistry,
  workflows: RwLock<HashMap<String, Arc<Workflow>>>,
  history: Mutex<VecDeque<WorkflowExecution>>,
  notifier: N,
}

impl WorkflowRunner<NoopNotifier> {
  pub fn new(config: RunnerConfig, registry: NodeRegistry) -> Self {
    Self::with_notifier(config, registry, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> WorkflowRunner<N> {
  pub fn with_notifier(config: RunnerConfig, registry: NodeRegistry, notifier: N) -> Self {
    Self {
      config,
      registry,
      workflows: RwLock::new(HashMap::new()),
      history: Mutex::new(VecDeque::new()),
      notifier,
    }
  }

  pub fn registry(&self) -> &NodeRegistry {
    &self.registry
  }

  /// Validate a definition and register it, replacing any workflow with the
  /// same id.
  pub fn create_workflow(&self, def: WorkflowDef) -> Result<Arc<Workflow>, RuntimeError> {
    let workflow = Arc::new(Workflow::build(def, &self.registry)?);
    let replaced = self
      .workflows
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(workflow.workflow_id.clone(), workflow.clone());

    info!(
      workflow_id = %workflow.workflow_id,
      nodes = workflow.len(),
      replaced = replaced.is_some(),
      "workflow_created"
    );
    Ok(workflow)
  }

  pub fn remove_workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
    self
      .workflows
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(workflow_id)
  }

  pub fn workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
    self
      .workflows
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(workflow_id)
      .cloned()
  }

  /// Registered workflow ids, sorted.
  pub fn workflow_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .workflows
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    ids.sort();
    ids
  }

  /// Look up a finished execution.
  pub fn execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
    self
      .lock_history()
      .iter()
      .find(|execution| execution.execution_id == execution_id)
      .cloned()
  }

  /// Finished executions still in history, oldest first.
  pub fn executions(&self) -> Vec<WorkflowExecution> {
    self.lock_history().iter().cloned().collect()
  }

  /// Run a registered workflow to completion.
  ///
  /// Returns the completed execution, or the first failure with the
  /// terminal execution record attached.
  #[instrument(name = "workflow_execute", skip(self, input), fields(workflow_id = %workflow_id))]
  pub async fn execute(
    &self,
    workflow_id: &str,
    input: Value,
  ) -> Result<WorkflowExecution, RuntimeError> {
    let workflow = self
      .workflow(workflow_id)
      .ok_or_else(|| RuntimeError::WorkflowNotFound {
        workflow_id: workflow_id.to_string(),
      })?;

    let mut run = Run::new(&workflow, &self.config, &self.notifier, input);
    let outcome = run.drive().await;
    let execution = run.finish(&outcome);
    self.record(execution.clone());

    match outcome {
      Outcome::Completed => Ok(execution),
      Outcome::NodeFailed { node_id, error } => Err(RuntimeError::NodeFailed {
        node_id,
        error,
        execution: Box::new(execution),
      }),
      Outcome::Unresolvable { blocked } => Err(RuntimeError::UnresolvableGraph {
        blocked,
        execution: Box::new(execution),
      }),
      Outcome::TimedOut { timeout_ms } => Err(RuntimeError::TimedOut {
        timeout_ms,
        execution: Box::new(execution),
      }),
    }
  }

  fn record(&self, execution: WorkflowExecution) {
    let limit = self.config.history_limit;
    if limit == 0 {
      return;
    }
    let mut history = self.lock_history();
    while history.len() >= limit {
      history.pop_front();
    }
    history.push_back(execution);
  }

  fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkflowExecution>> {
    self.history.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// How a run ended.
enum Outcome {
  Completed,
  NodeFailed { node_id: String, error: String },
  Unresolvable { blocked: Vec<String> },
  TimedOut { timeout_ms: u64 },
}

/// State of one execution, mutated only by the task driving it.
struct Run<'a, N> {
  workflow: &'a Workflow,
  config: &'a RunnerConfig,
  notifier: &'a N,
  execution: WorkflowExecution,
  context: WorkflowContext,
  /// First node failure, in wave and declaration order.
  failure: Option<(String, String)>,
}

impl<'a, N: ExecutionNotifier> Run<'a, N> {
  fn new(
    workflow: &'a Workflow,
    config: &'a RunnerConfig,
    notifier: &'a N,
    input: Value,
  ) -> Self {
    let execution = WorkflowExecution::start(
      &workflow.workflow_id,
      workflow.nodes().iter().map(|node| &node.node_id),
    );

    info!(
      execution_id = %execution.execution_id,
      workflow_id = %workflow.workflow_id,
      "workflow_started"
    );
    notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution.execution_id.clone(),
      workflow_id: workflow.workflow_id.clone(),
    });

    Self {
      workflow,
      config,
      notifier,
      execution,
      context: WorkflowContext::new(input),
      failure: None,
    }
  }

  async fn drive(&mut self) -> Outcome {
    let deadline = self.config.timeout().map(|timeout| Instant::now() + timeout);
    let mut wave = 0;

    loop {
      if self.failure.is_some() && !self.config.continue_on_failure {
        break;
      }

      let ready = self.ready_nodes();
      if ready.is_empty() {
        let blocked = self.pending_nodes();
        if blocked.is_empty() || self.failure.is_some() {
          break;
        }
        return Outcome::Unresolvable { blocked };
      }

      wave += 1;
      let ids: Vec<String> = ready.iter().map(|node| node.node_id.clone()).collect();
      info!(
        execution_id = %self.execution.execution_id,
        wave,
        ready_nodes = ?ids,
        "executing wave"
      );
      self.notifier.notify(ExecutionEvent::WaveStarted {
        execution_id: self.execution.execution_id.clone(),
        wave,
        node_ids: ids,
      });

      for node in &ready {
        if let Some(state) = self.execution.nodes.get_mut(&node.node_id) {
          state.start();
        }
        self.notifier.notify(ExecutionEvent::NodeStarted {
          execution_id: self.execution.execution_id.clone(),
          node_id: node.node_id.clone(),
        });
      }

      // Every node in the wave sees the same snapshot.
      let snapshot = Arc::new(self.context.clone());
      let handles: Vec<_> = ready
        .iter()
        .map(|node| {
          let handler = node.handler.clone();
          let input = node.input(snapshot.clone());
          tokio::spawn(async move { handler.run(input).await })
        })
        .collect();
      let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
      let joined = futures::future::join_all(handles);

      let results = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, joined).await {
          Ok(results) => results,
          Err(_) => {
            for abort in aborts {
              abort.abort();
            }
            let timeout_ms = self.config.timeout_ms.unwrap_or_default();
            self.fail_running(&format!("timed out after {}ms", timeout_ms));
            return Outcome::TimedOut { timeout_ms };
          }
        },
        None => joined.await,
      };

      for (node, result) in ready.into_iter().zip(results) {
        let outcome = match result {
          Ok(outcome) => outcome,
          Err(e) if e.is_panic() => Err(TaskError::from_panic(&*e.into_panic())),
          Err(e) => Err(TaskError::failed(format!("node task did not finish: {}", e))),
        };

        match outcome {
          Ok(value) => self.complete_node(node, value),
          Err(e) => self.fail_node(node, e.to_string()),
        }
      }
    }

    match self.failure.clone() {
      Some((node_id, error)) => Outcome::NodeFailed { node_id, error },
      None => Outcome::Completed,
    }
  }

  /// Pending nodes whose upstream nodes have all completed, in declaration
  /// order.
  fn ready_nodes(&self) -> Vec<&'a Node> {
    let graph = self.workflow.graph();
    let workflow: &'a Workflow = self.workflow;
    workflow
      .nodes()
      .iter()
      .filter(|node| self.execution.node_status(&node.node_id) == Some(NodeStatus::Pending))
      .filter(|node| {
        graph
          .upstream(&node.node_id)
          .iter()
          .all(|up| self.execution.node_status(up) == Some(NodeStatus::Completed))
      })
      .collect()
  }

  fn pending_nodes(&self) -> Vec<String> {
    self.execution.nodes_with_status(NodeStatus::Pending)
  }

  fn complete_node(&mut self, node: &Node, value: Value) {
    if let Some(state) = self.execution.nodes.get_mut(&node.node_id) {
      state.finish(NodeStatus::Completed, None);
    }
    self
      .execution
      .results
      .insert(node.node_id.clone(), value.clone());
    self
      .context
      .results
      .insert(node.node_id.clone(), value.clone());

    self.notifier.notify(ExecutionEvent::NodeCompleted {
      execution_id: self.execution.execution_id.clone(),
      node_id: node.node_id.clone(),
      data: value,
    });
  }

  fn fail_node(&mut self, node: &Node, error: String) {
    let error = if error.is_empty() {
      "node failed".to_string()
    } else {
      error
    };

    error!(
      execution_id = %self.execution.execution_id,
      node_id = %node.node_id,
      error = %error,
      "node_failed"
    );
    if let Some(state) = self.execution.nodes.get_mut(&node.node_id) {
      state.finish(NodeStatus::Failed, Some(error.clone()));
    }
    self.notifier.notify(ExecutionEvent::NodeFailed {
      execution_id: self.execution.execution_id.clone(),
      node_id: node.node_id.clone(),
      error: error.clone(),
    });

    if self.config.continue_on_failure {
      // Everything downstream of the failure can no longer run.
      let mut blocked: Vec<String> = self
        .workflow
        .graph()
        .descendants(&node.node_id)
        .into_iter()
        .collect();
      blocked.sort();
      for node_id in blocked {
        self.skip(&node_id);
      }
    }

    if self.failure.is_none() {
      self.failure = Some((node.node_id.clone(), error));
    }
  }

  fn fail_running(&mut self, error: &str) {
    for node_id in self.execution.nodes_with_status(NodeStatus::Running) {
      warn!(
        execution_id = %self.execution.execution_id,
        node_id = %node_id,
        error,
        "node aborted"
      );
      if let Some(state) = self.execution.nodes.get_mut(&node_id) {
        state.finish(NodeStatus::Failed, Some(error.to_string()));
      }
      self.notifier.notify(ExecutionEvent::NodeFailed {
        execution_id: self.execution.execution_id.clone(),
        node_id,
        error: error.to_string(),
      });
    }
  }

  fn skip(&mut self, node_id: &str) {
    let Some(state) = self.execution.nodes.get_mut(node_id) else {
      return;
    };
    if state.status != NodeStatus::Pending {
      return;
    }
    state.finish(NodeStatus::Skipped, None);
    self.notifier.notify(ExecutionEvent::NodeSkipped {
      execution_id: self.execution.execution_id.clone(),
      node_id: node_id.to_string(),
    });
  }

  /// Skip whatever never ran, settle the status, and hand back the record.
  fn finish(mut self, outcome: &Outcome) -> WorkflowExecution {
    for node_id in self.pending_nodes() {
      self.skip(&node_id);
    }

    let execution_id = self.execution.execution_id.clone();
    match outcome {
      Outcome::Completed => {
        self.execution.complete();
        info!(execution_id = %execution_id, "workflow_completed");
        self
          .notifier
          .notify(ExecutionEvent::WorkflowCompleted { execution_id });
      }
      Outcome::NodeFailed { node_id, error } => {
        self.fail_execution(format!("node '{}' failed: {}", node_id, error));
      }
      Outcome::Unresolvable { blocked } => {
        self.fail_execution(format!(
          "no runnable nodes; blocked: {}",
          blocked.join(", ")
        ));
      }
      Outcome::TimedOut { timeout_ms } => {
        self.fail_execution(format!("timed out after {}ms", timeout_ms));
      }
    }

    self.execution
  }

  fn fail_execution(&mut self, error: String) {
    error!(
      execution_id = %self.execution.execution_id,
      error = %error,
      "workflow_failed"
    );
    self.execution.fail(error.clone());
    self.notifier.notify(ExecutionEvent::WorkflowFailed {
      execution_id: self.execution.execution_id.clone(),
      error,
    });
  }
}
