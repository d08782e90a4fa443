//! The execution engine façade.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use taskloom_cache::{CacheStats, InMemoryKvStore, KvStore, ResultCache};
use taskloom_config::EngineConfig;
use taskloom_task::{TaskRegistry, TaskResult};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument};

use crate::coalescer::{BatchCoalescer, CoalescerStats};
use crate::error::EngineError;
use crate::pool::{PoolStats, WorkerPool};

/// Context key under which staged execution exposes earlier stage results.
pub const STAGE_RESULTS_KEY: &str = "previous_results";

/// One entry of a batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
  pub task_name: String,
  pub context: Value,
}

impl TaskRequest {
  pub fn new(task_name: impl Into<String>, context: Value) -> Self {
    Self {
      task_name: task_name.into(),
      context,
    }
  }
}

/// Output of [`ExecutionEngine::execute_staged`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StagedResult {
  /// Per-stage results keyed by task name, in stage order.
  pub stages: Vec<HashMap<String, TaskResult>>,
  /// Data of every task across all stages, keyed by task name.
  pub results: serde_json::Map<String, Value>,
}

/// Snapshot of engine and component counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
  pub running: bool,
  pub uptime_ms: u64,
  pub pool: PoolStats,
  pub coalescer: CoalescerStats,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache: Option<CacheStats>,
}

enum State {
  NotStarted,
  Running { started_at: Instant },
  ShutDown,
}

/// Runs named tasks through the cache, the worker pool, and the coalescer.
///
/// Single calls go through the [`WorkerPool`]; batch and staged calls go
/// through the [`BatchCoalescer`]. Both consult the [`ResultCache`] first
/// unless the caller opts out, and only successful results are written back.
/// Write-back runs in the background so a slow store never delays the caller.
pub struct ExecutionEngine {
  registry: Arc<TaskRegistry>,
  cache: Option<ResultCache>,
  cache_writes: TaskTracker,
  pool: WorkerPool,
  coalescer: BatchCoalescer,
  state: Mutex<State>,
}

impl ExecutionEngine {
  /// Create an engine with an in-process cache store.
  pub fn new(config: EngineConfig, registry: TaskRegistry) -> Self {
    Self::with_store(config, registry, Arc::new(InMemoryKvStore::new()))
  }

  /// Create an engine backed by the given key-value store.
  pub fn with_store(
    config: EngineConfig,
    registry: TaskRegistry,
    store: Arc<dyn KvStore>,
  ) -> Self {
    let registry = Arc::new(registry);
    let cache = config
      .cache
      .enabled
      .then(|| ResultCache::new(store, &config.cache));

    Self {
      pool: WorkerPool::new(registry.clone(), config.pool),
      coalescer: BatchCoalescer::new(registry.clone(), config.batch),
      registry,
      cache,
      cache_writes: TaskTracker::new(),
      state: Mutex::new(State::NotStarted),
    }
  }

  pub fn registry(&self) -> &TaskRegistry {
    &self.registry
  }

  /// Start the pool workers and the coalescer loop.
  ///
  /// Idempotent while running. Fails with [`EngineError::ShutDown`] once the
  /// engine has been shut down.
  pub fn initialize(&self) -> Result<(), EngineError> {
    let mut state = self.lock();
    match *state {
      State::Running { .. } => return Ok(()),
      State::ShutDown => return Err(EngineError::ShutDown),
      State::NotStarted => {}
    }

    self.pool.start()?;
    self.coalescer.start()?;
    *state = State::Running {
      started_at: Instant::now(),
    };

    info!(tasks = self.registry.len(), "execution engine initialized");
    Ok(())
  }

  /// Drain queued work, stop the pool and the coalescer, then wait for
  /// outstanding cache writes. Each write is bounded by the cache write
  /// timeout.
  pub async fn shutdown(&self) {
    {
      let mut state = self.lock();
      if matches!(*state, State::ShutDown) {
        return;
      }
      *state = State::ShutDown;
    }

    tokio::join!(self.pool.shutdown(), self.coalescer.shutdown());
    self.cache_writes.close();
    self.cache_writes.wait().await;
    info!("execution engine shut down");
  }

  pub fn is_running(&self) -> bool {
    matches!(*self.lock(), State::Running { .. })
  }

  /// Run one task.
  ///
  /// Handler errors and panics come back as a failed [`TaskResult`]; only
  /// lifecycle and unknown-task problems are `Err`.
  #[instrument(name = "engine_execute", skip_all, fields(task = %task_name, use_cache))]
  pub async fn execute(
    &self,
    task_name: &str,
    context: Value,
    use_cache: bool,
  ) -> Result<TaskResult, EngineError> {
    self.check_ready(task_name)?;

    let cache = self.cache.as_ref().filter(|_| use_cache);
    if let Some(cache) = cache {
      if let Some(hit) = cache.get(task_name, &context).await {
        debug!("cache hit");
        return Ok(hit);
      }
    }

    let handle = self.pool.submit(task_name, context.clone()).await?;
    let result = TaskResult::from(handle.wait().await);

    if let Some(cache) = cache {
      self.write_back(cache, task_name, context, &result);
    }
    Ok(result)
  }

  /// Run many tasks through the coalescer.
  ///
  /// The output has one result per request, in request order.
  #[instrument(name = "engine_execute_batch", skip_all, fields(size = requests.len()))]
  pub async fn execute_batch(
    &self,
    requests: Vec<TaskRequest>,
    use_cache: bool,
  ) -> Result<Vec<TaskResult>, EngineError> {
    for request in &requests {
      self.check_ready(&request.task_name)?;
    }

    let cache = self.cache.as_ref().filter(|_| use_cache);
    let mut results: Vec<Option<TaskResult>> = vec![None; requests.len()];
    let mut handles = Vec::new();

    for (index, request) in requests.iter().enumerate() {
      if let Some(cache) = cache {
        if let Some(hit) = cache.get(&request.task_name, &request.context).await {
          results[index] = Some(hit);
          continue;
        }
      }
      let handle = self
        .coalescer
        .submit(&request.task_name, request.context.clone())?;
      handles.push((index, handle));
    }

    debug!(
      hits = requests.len() - handles.len(),
      misses = handles.len(),
      "batch submitted"
    );

    let waits = handles
      .into_iter()
      .map(|(index, handle)| async move { (index, TaskResult::from(handle.wait().await)) });
    for (index, result) in futures::future::join_all(waits).await {
      if let Some(cache) = cache {
        let request = &requests[index];
        self.write_back(cache, &request.task_name, request.context.clone(), &result);
      }
      results[index] = Some(result);
    }

    Ok(
      results
        .into_iter()
        .map(|result| result.unwrap_or_else(|| TaskResult::failed("no result produced")))
        .collect(),
    )
  }

  /// Run stages of tasks in order, feeding earlier results forward.
  ///
  /// Every task in a stage sees the same context: the caller's context plus
  /// a [`STAGE_RESULTS_KEY`] object mapping each task name from earlier
  /// stages to its result data. Failed tasks contribute `null` and do not
  /// stop later stages. A task name may appear at most once per stage.
  #[instrument(name = "engine_execute_staged", skip_all, fields(stages = stages.len()))]
  pub async fn execute_staged(
    &self,
    stages: &[Vec<String>],
    context: Value,
  ) -> Result<StagedResult, EngineError> {
    for (index, stage) in stages.iter().enumerate() {
      let mut seen = HashSet::with_capacity(stage.len());
      if let Some(task_name) = stage.iter().find(|&name| !seen.insert(name.as_str())) {
        return Err(EngineError::DuplicateStageTask {
          stage: index,
          task_name: task_name.clone(),
        });
      }
    }

    let mut base = match context {
      Value::Object(map) => map,
      other => {
        let mut map = serde_json::Map::new();
        map.insert("input".to_string(), other);
        map
      }
    };

    let mut staged = StagedResult::default();
    for (index, stage) in stages.iter().enumerate() {
      base.insert(
        STAGE_RESULTS_KEY.to_string(),
        Value::Object(staged.results.clone()),
      );
      let stage_context = Value::Object(base.clone());

      let requests = stage
        .iter()
        .map(|task_name| TaskRequest::new(task_name.clone(), stage_context.clone()))
        .collect();
      let results = self.execute_batch(requests, true).await?;

      let mut outcome = HashMap::with_capacity(stage.len());
      for (task_name, result) in stage.iter().zip(results) {
        let data = if result.success {
          result.data.clone()
        } else {
          Value::Null
        };
        staged.results.insert(task_name.clone(), data);
        outcome.insert(task_name.clone(), result);
      }

      debug!(stage = index, tasks = stage.len(), "stage finished");
      staged.stages.push(outcome);
    }

    Ok(staged)
  }

  /// Drop the cached result for one (task, context) pair.
  pub async fn invalidate(&self, task_name: &str, context: &Value) {
    if let Some(cache) = &self.cache {
      cache.invalidate(task_name, context).await;
    }
  }

  pub fn stats(&self) -> EngineStats {
    let (running, uptime_ms) = match &*self.lock() {
      State::Running { started_at } => (true, started_at.elapsed().as_millis() as u64),
      _ => (false, 0),
    };

    EngineStats {
      running,
      uptime_ms,
      pool: self.pool.stats(),
      coalescer: self.coalescer.stats(),
      cache: self.cache.as_ref().map(ResultCache::stats),
    }
  }

  /// Cache a successful result without holding up the caller.
  fn write_back(&self, cache: &ResultCache, task_name: &str, context: Value, result: &TaskResult) {
    if !result.success {
      return;
    }
    let cache = cache.clone();
    let task_name = task_name.to_string();
    let result = result.clone();
    self.cache_writes.spawn(async move {
      cache.put(&task_name, &context, &result).await;
    });
  }

  fn check_ready(&self, task_name: &str) -> Result<(), EngineError> {
    if !self.is_running() {
      return Err(EngineError::NotStarted);
    }
    if !self.registry.contains(task_name) {
      return Err(EngineError::UnknownTask {
        task_name: task_name.to_string(),
      });
    }
    Ok(())
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
