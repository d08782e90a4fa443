//! Fixed-size worker pool over a bounded queue.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use taskloom_config::PoolConfig;
use taskloom_task::{TaskError, TaskRegistry, TaskResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::invocation::{InvocationHandle, PendingInvocation};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<PendingInvocation>>>;

/// Snapshot of pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
  pub running: bool,
  pub workers: usize,
  pub executions: u64,
  pub errors: u64,
  pub queue_depth: usize,
  pub queue_capacity: usize,
  pub uptime_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
  executions: AtomicU64,
  errors: AtomicU64,
}

enum Lifecycle {
  Idle,
  Running {
    sender: mpsc::Sender<PendingInvocation>,
    workers: Vec<JoinHandle<()>>,
    started_at: Instant,
  },
  Stopped,
}

/// `W` workers pulling from a FIFO queue of capacity `Q`.
///
/// `submit` waits while the queue is full, so work is never dropped.
/// `shutdown` closes the queue, lets the workers drain it, and waits for
/// them to exit.
pub struct WorkerPool {
  registry: Arc<TaskRegistry>,
  config: PoolConfig,
  lifecycle: Mutex<Lifecycle>,
  counters: Arc<Counters>,
  cancel: CancellationToken,
}

impl WorkerPool {
  pub fn new(registry: Arc<TaskRegistry>, config: PoolConfig) -> Self {
    Self {
      registry,
      config,
      lifecycle: Mutex::new(Lifecycle::Idle),
      counters: Arc::new(Counters::default()),
      cancel: CancellationToken::new(),
    }
  }

  /// Spawn the workers. Must be called from within a tokio runtime.
  ///
  /// Calling it again while running is a no-op.
  pub fn start(&self) -> Result<(), EngineError> {
    let mut lifecycle = self.lock();
    match *lifecycle {
      Lifecycle::Running { .. } => return Ok(()),
      Lifecycle::Stopped => return Err(EngineError::ShutDown),
      Lifecycle::Idle => {}
    }

    let workers = self.config.workers.max(1);
    let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
    let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));

    let handles = (0..workers)
      .map(|worker_id| {
        tokio::spawn(worker_loop(
          worker_id,
          receiver.clone(),
          self.counters.clone(),
          self.config.poll_interval(),
          self.cancel.clone(),
        ))
      })
      .collect();

    info!(
      workers,
      queue_capacity = self.config.queue_capacity,
      "worker pool started"
    );

    *lifecycle = Lifecycle::Running {
      sender,
      workers: handles,
      started_at: Instant::now(),
    };
    Ok(())
  }

  /// Queue one invocation.
  ///
  /// Waits while the queue is full. The returned handle resolves with the
  /// handler's result or its error; the pool never retries.
  pub async fn submit(
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

    let sender = match &*self.lock() {
      Lifecycle::Running { sender, .. } => sender.clone(),
      Lifecycle::Idle => return Err(EngineError::NotStarted),
      Lifecycle::Stopped => return Err(EngineError::ShutDown),
    };

    let (pending, handle) = PendingInvocation::new(task_name, context, handler);
    sender
      .send(pending)
      .await
      .map_err(|_| EngineError::ShutDown)?;

    debug!(task = %task_name, "invocation queued");
    Ok(handle)
  }

  /// Close the queue, wait for queued and in-flight work, then stop.
  ///
  /// Safe to call more than once.
  pub async fn shutdown(&self) {
    let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Stopped);
    let Lifecycle::Running {
      sender, workers, ..
    } = previous
    else {
      return;
    };

    // Workers exit once the channel is closed and empty.
    drop(sender);
    for result in futures::future::join_all(workers).await {
      if let Err(e) = result {
        warn!(error = %e, "worker exited abnormally");
      }
    }
    self.cancel.cancel();

    info!(
      executions = self.counters.executions.load(Ordering::Relaxed),
      "worker pool stopped"
    );
  }

  pub fn stats(&self) -> PoolStats {
    let lifecycle = self.lock();
    let (running, queue_depth, uptime) = match &*lifecycle {
      Lifecycle::Running {
        sender, started_at, ..
      } => (
        true,
        sender.max_capacity() - sender.capacity(),
        started_at.elapsed(),
      ),
      _ => (false, 0, Duration::ZERO),
    };

    PoolStats {
      running,
      workers: self.config.workers.max(1),
      executions: self.counters.executions.load(Ordering::Relaxed),
      errors: self.counters.errors.load(Ordering::Relaxed),
      queue_depth,
      queue_capacity: self.config.queue_capacity.max(1),
      uptime_ms: uptime.as_millis() as u64,
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    // Idle workers notice this on their next poll.
    self.cancel.cancel();
  }
}

async fn worker_loop(
  worker_id: usize,
  receiver: SharedReceiver,
  counters: Arc<Counters>,
  poll_interval: Duration,
  cancel: CancellationToken,
) {
  debug!(worker_id, "worker started");

  loop {
    let next = {
      let mut receiver = receiver.lock().await;
      tokio::time::timeout(poll_interval, receiver.recv()).await
    };

    match next {
      Ok(Some(pending)) => run_invocation(worker_id, pending, &counters).await,
      // Closed and drained.
      Ok(None) => break,
      Err(_) => {
        if cancel.is_cancelled() {
          break;
        }
      }
    }
  }

  debug!(worker_id, "worker stopped");
}

async fn run_invocation(worker_id: usize, pending: PendingInvocation, counters: &Counters) {
  let started = Instant::now();
  let PendingInvocation {
    task_name,
    context,
    handler,
    reply,
  } = pending;

  let outcome: Result<TaskResult, TaskError> = AssertUnwindSafe(handler.invoke(context))
    .catch_unwind()
    .await
    .unwrap_or_else(|payload| Err(TaskError::from_panic(&*payload)));

  counters.executions.fetch_add(1, Ordering::Relaxed);
  let failed = !matches!(&outcome, Ok(result) if result.success);
  if failed {
    counters.errors.fetch_add(1, Ordering::Relaxed);
  }

  debug!(
    worker_id,
    task = %task_name,
    failed,
    elapsed_ms = started.elapsed().as_millis() as u64,
    "invocation finished"
  );

  let _ = reply.send(outcome);
}
