//! Micro-batching of same-task invocations.
//!
//! Callers push invocations onto a shared deque. A single background loop
//! collects a batch (up to `batch_size` items, or whatever arrived within
//! `batch_timeout` of the first one), groups it by task name, and runs every
//! group concurrently through the handler's `invoke_batch`. Each caller still
//! gets its own result.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use taskloom_config::BatchConfig;
use taskloom_task::{TaskError, TaskRegistry, TaskResult};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::invocation::{InvocationHandle, PendingInvocation};

/// Snapshot of coalescer counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoalescerStats {
  pub running: bool,
  pub submitted: u64,
  pub batches: u64,
  pub groups: u64,
  pub executions: u64,
  pub errors: u64,
  pub pending: usize,
}

#[derive(Default)]
struct Shared {
  pending: Mutex<VecDeque<PendingInvocation>>,
  notify: Notify,
  submitted: AtomicU64,
  batches: AtomicU64,
  groups: AtomicU64,
  executions: AtomicU64,
  errors: AtomicU64,
}

impl Shared {
  fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingInvocation>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn pop(&self) -> Option<PendingInvocation> {
    self.pending().pop_front()
  }
}

enum Lifecycle {
  Idle,
  Running {
    task: JoinHandle<()>,
    stop: CancellationToken,
  },
  Stopped,
}

/// Groups concurrent invocations by task name and dispatches them together.
pub struct BatchCoalescer {
  registry: Arc<TaskRegistry>,
  config: BatchConfig,
  shared: Arc<Shared>,
  lifecycle: Mutex<Lifecycle>,
}

impl BatchCoalescer {
  pub fn new(registry: Arc<TaskRegistry>, config: BatchConfig) -> Self {
    Self {
      registry,
      config,
      shared: Arc::new(Shared::default()),
      lifecycle: Mutex::new(Lifecycle::Idle),
    }
  }

  /// Spawn the batching loop. Must be called from within a tokio runtime.
  pub fn start(&self) -> Result<(), EngineError> {
    let mut lifecycle = self.lock();
    match *lifecycle {
      Lifecycle::Running { .. } => return Ok(()),
      Lifecycle::Stopped => return Err(EngineError::ShutDown),
      Lifecycle::Idle => {}
    }

    let stop = CancellationToken::new();
    let task = tokio::spawn(batch_loop(
      self.shared.clone(),
      self.config.clone(),
      stop.clone(),
    ));

    info!(
      batch_size = self.config.batch_size,
      batch_timeout_ms = self.config.batch_timeout_ms,
      "batch coalescer started"
    );

    *lifecycle = Lifecycle::Running { task, stop };
    Ok(())
  }

  /// Add an invocation to the next batch.
  pub fn submit(
    &self,
    task_name: &str,
    context: serde_json::Value,
  ) -> Result<InvocationHandle, EngineError> {
    let handler = self
      .registry
      .get(task_name)
      .ok_or_else(|| EngineError::UnknownTask {
        task_name: task_name.to_string(),
      })?;

    // Hold the lifecycle lock while pushing so shutdown cannot slip in
    // between the state check and the push.
    let lifecycle = self.lock();
    match *lifecycle {
      Lifecycle::Running { .. } => {}
      Lifecycle::Idle => return Err(EngineError::NotStarted),
      Lifecycle::Stopped => return Err(EngineError::ShutDown),
    }

    let (pending, handle) = PendingInvocation::new(task_name, context, handler);
    self.shared.pending().push_back(pending);
    self.shared.submitted.fetch_add(1, Ordering::Relaxed);
    drop(lifecycle);

    self.shared.notify.notify_one();
    Ok(handle)
  }

  /// Stop accepting work, flush everything pending, and stop the loop.
  ///
  /// Safe to call more than once.
  pub async fn shutdown(&self) {
    let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Stopped);
    let Lifecycle::Running { task, stop } = previous else {
      return;
    };

    stop.cancel();
    self.shared.notify.notify_one();
    if let Err(e) = task.await {
      warn!(error = %e, "batch loop exited abnormally");
    }

    info!(
      batches = self.shared.batches.load(Ordering::Relaxed),
      "batch coalescer stopped"
    );
  }

  pub fn stats(&self) -> CoalescerStats {
    let running = matches!(*self.lock(), Lifecycle::Running { .. });
    CoalescerStats {
      running,
      submitted: self.shared.submitted.load(Ordering::Relaxed),
      batches: self.shared.batches.load(Ordering::Relaxed),
      groups: self.shared.groups.load(Ordering::Relaxed),
      executions: self.shared.executions.load(Ordering::Relaxed),
      errors: self.shared.errors.load(Ordering::Relaxed),
      pending: self.shared.pending().len(),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

async fn batch_loop(shared: Arc<Shared>, config: BatchConfig, stop: CancellationToken) {
  loop {
    let batch = collect_batch(&shared, &config, &stop).await;
    if batch.is_empty() {
      if stop.is_cancelled() {
        break;
      }
      continue;
    }
    dispatch(&shared, batch).await;
  }
}

/// Wait for the first item, then gather more until the batch is full or the
/// window closes. Returns empty only when stopping with nothing pending.
async fn collect_batch(
  shared: &Shared,
  config: &BatchConfig,
  stop: &CancellationToken,
) -> Vec<PendingInvocation> {
  let first = loop {
    if let Some(item) = shared.pop() {
      break item;
    }
    if stop.is_cancelled() {
      return Vec::new();
    }
    tokio::select! {
      _ = shared.notify.notified() => {}
      _ = tokio::time::sleep(config.idle_interval()) => {}
      _ = stop.cancelled() => {}
    }
  };

  let batch_size = config.batch_size.max(1);
  let deadline = Instant::now() + config.batch_timeout();
  let mut batch = vec![first];

  while batch.len() < batch_size {
    if let Some(item) = shared.pop() {
      batch.push(item);
      continue;
    }
    // Flush without waiting once stopping.
    if stop.is_cancelled() {
      break;
    }
    tokio::select! {
      _ = shared.notify.notified() => {}
      _ = tokio::time::sleep_until(deadline) => break,
      _ = stop.cancelled() => {}
    }
  }

  batch
}

async fn dispatch(shared: &Shared, batch: Vec<PendingInvocation>) {
  let size = batch.len();
  let mut groups: HashMap<String, Vec<PendingInvocation>> = HashMap::new();
  for item in batch {
    groups.entry(item.task_name.clone()).or_default().push(item);
  }

  shared.batches.fetch_add(1, Ordering::Relaxed);
  shared
    .groups
    .fetch_add(groups.len() as u64, Ordering::Relaxed);
  debug!(size, groups = groups.len(), "dispatching batch");

  let runs = groups
    .into_iter()
    .map(|(task_name, items)| run_group(shared, task_name, items));
  futures::future::join_all(runs).await;
}

/// Run one same-task group on its own tokio task and resolve each item.
async fn run_group(shared: &Shared, task_name: String, items: Vec<PendingInvocation>) {
  let count = items.len();
  let handler = items[0].handler.clone();

  let mut contexts = Vec::with_capacity(count);
  let mut replies = Vec::with_capacity(count);
  for item in items {
    contexts.push(item.context);
    replies.push(item.reply);
  }

  let outcomes: Vec<Result<TaskResult, TaskError>> =
    match tokio::spawn(async move { handler.invoke_batch(contexts).await }).await {
      Ok(outcomes) if outcomes.len() == count => outcomes,
      Ok(outcomes) => {
        let message = format!(
          "handler for '{}' returned {} results for {} requests",
          task_name,
          outcomes.len(),
          count
        );
        warn!(task = %task_name, "{}", message);
        vec![Err(TaskError::failed(message)); count]
      }
      Err(e) => {
        let error = if e.is_panic() {
          TaskError::from_panic(&*e.into_panic())
        } else {
          TaskError::failed(format!("batch for '{}' was cancelled", task_name))
        };
        vec![Err(error); count]
      }
    };

  let errors = outcomes
    .iter()
    .filter(|outcome| !matches!(outcome, Ok(result) if result.success))
    .count() as u64;
  shared.executions.fetch_add(count as u64, Ordering::Relaxed);
  shared.errors.fetch_add(errors, Ordering::Relaxed);

  for (reply, outcome) in replies.into_iter().zip(outcomes) {
    let _ = reply.send(outcome);
  }
}
