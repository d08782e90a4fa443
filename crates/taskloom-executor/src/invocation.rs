//! Queued invocations and the handles callers wait on.

use std::sync::Arc;

use taskloom_task::{TaskError, TaskHandler, TaskResult};
use tokio::sync::oneshot;

/// One task call waiting in the pool queue or the coalescer deque.
pub(crate) struct PendingInvocation {
  pub task_name: String,
  pub context: serde_json::Value,
  pub handler: Arc<dyn TaskHandler>,
  pub reply: oneshot::Sender<Result<TaskResult, TaskError>>,
}

impl PendingInvocation {
  pub fn new(
    task_name: impl Into<String>,
    context: serde_json::Value,
    handler: Arc<dyn TaskHandler>,
  ) -> (Self, InvocationHandle) {
    let task_name = task_name.into();
    let (reply, receiver) = oneshot::channel();
    let handle = InvocationHandle {
      task_name: task_name.clone(),
      receiver,
    };
    let pending = Self {
      task_name,
      context,
      handler,
      reply,
    };
    (pending, handle)
  }
}

/// A handle to a submitted invocation.
///
/// Call `.wait()` to get the outcome. Each handle resolves exactly once.
#[derive(Debug)]
pub struct InvocationHandle {
  task_name: String,
  receiver: oneshot::Receiver<Result<TaskResult, TaskError>>,
}

impl InvocationHandle {
  pub fn task_name(&self) -> &str {
    &self.task_name
  }

  /// Wait for the invocation to finish.
  ///
  /// Handler errors and panics come back as `Err`. If the invocation was
  /// dropped without running, that is reported as a failure too.
  pub async fn wait(self) -> Result<TaskResult, TaskError> {
    match self.receiver.await {
      Ok(outcome) => outcome,
      Err(_) => Err(TaskError::failed(format!(
        "invocation of '{}' was dropped before completing",
        self.task_name
      ))),
    }
  }
}
