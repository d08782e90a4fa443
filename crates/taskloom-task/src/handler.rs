use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::TaskError;
use crate::result::TaskResult;

/// A named unit of work the engine can run.
///
/// Implementations receive the caller's context untouched and return a
/// [`TaskResult`]. Returning `Err` signals that the handler itself broke;
/// the engine turns it into a failed result for the caller.
#[async_trait]
pub trait TaskHandler: Send + Sync {
  /// Run one invocation.
  async fn invoke(&self, context: serde_json::Value) -> Result<TaskResult, TaskError>;

  /// Run a group of same-task invocations collected by the coalescer.
  ///
  /// The default runs every context concurrently through [`invoke`]. A
  /// panic in one invocation fails only that entry. Handlers that can fuse requests (one upstream call for many symbols,
  /// for example) override this. The returned vector must have one entry
  /// per context, in the same order.
  ///
  /// [`invoke`]: TaskHandler::invoke
  async fn invoke_batch(
    &self,
    contexts: Vec<serde_json::Value>,
  ) -> Vec<Result<TaskResult, TaskError>> {
    let runs = contexts.into_iter().map(|context| {
      AssertUnwindSafe(self.invoke(context))
        .catch_unwind()
        .map(settle_outcome)
    });
    futures::future::join_all(runs).await
  }
}

/// Turns a caught panic into a failed result for that entry.
fn settle_outcome(
  outcome: std::thread::Result<Result<TaskResult, TaskError>>,
) -> Result<TaskResult, TaskError> {
  outcome.unwrap_or_else(|payload| Err(TaskError::from_panic(&*payload)))
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct TaskFn<F> {
  f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for TaskFn<F>
where
  F: Fn(serde_json::Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
  async fn invoke(&self, context: serde_json::Value) -> Result<TaskResult, TaskError> {
    (self.f)(context).await
  }
}

/// Wrap an async closure as a shareable handler.
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
  F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
  Arc::new(TaskFn { f })
}
