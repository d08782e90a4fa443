//! Integration tests for ExecutionEngine call patterns.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_cache::{CacheError, KvStore};
use taskloom_config::{BatchConfig, EngineConfig};
use taskloom_executor::{EngineError, ExecutionEngine, STAGE_RESULTS_KEY, TaskRequest};
use taskloom_task::{TaskError, TaskRegistry, TaskResult, task_fn};

/// Registry with a counting `square` task, a `fail` task, and a `seen` task
/// that echoes its context.
fn registry(calls: Arc<AtomicUsize>) -> TaskRegistry {
  TaskRegistry::new()
    .with(
      "square",
      task_fn(move |context| {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          let n = context["n"]
            .as_i64()
            .ok_or_else(|| TaskError::invalid_input("n must be an integer"))?;
          Ok(TaskResult::ok(json!(n * n)))
        }
      }),
    )
    .with(
      "fail",
      task_fn(|_| async { Ok(TaskResult::failed("upstream unavailable")) }),
    )
    .with(
      "seen",
      task_fn(|context| async move { Ok(TaskResult::ok(context)) }),
    )
}

fn engine_with(config: EngineConfig) -> (ExecutionEngine, Arc<AtomicUsize>) {
  let calls = Arc::new(AtomicUsize::new(0));
  let engine = ExecutionEngine::new(config, registry(calls.clone()));
  engine.initialize().expect("engine should start");
  (engine, calls)
}

fn engine() -> (ExecutionEngine, Arc<AtomicUsize>) {
  engine_with(EngineConfig::default())
}

/// Cache writes land in the background; wait until `expected` have settled.
async fn wait_for_cache_writes(engine: &ExecutionEngine, expected: u64) {
  let settled = async {
    loop {
      let cache = engine.stats().cache.expect("cache enabled");
      if cache.writes + cache.write_failures >= expected {
        break;
      }
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
  };
  tokio::time::timeout(Duration::from_secs(5), settled)
    .await
    .expect("cache writes should settle");
}

/// A store whose writes never finish.
struct StuckStore;

#[async_trait]
impl KvStore for StuckStore {
  async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    Ok(None)
  }

  async fn setex(&self, _key: &str, _ttl: Duration, _value: Vec<u8>) -> Result<(), CacheError> {
    std::future::pending().await
  }

  async fn delete(&self, _key: &str) -> Result<(), CacheError> {
    Ok(())
  }
}

/// A store that rejects every write.
struct ReadOnlyStore;

#[async_trait]
impl KvStore for ReadOnlyStore {
  async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    Ok(None)
  }

  async fn setex(&self, _key: &str, _ttl: Duration, _value: Vec<u8>) -> Result<(), CacheError> {
    Err(CacheError::Unavailable("read-only replica".to_string()))
  }

  async fn delete(&self, _key: &str) -> Result<(), CacheError> {
    Ok(())
  }
}

#[tokio::test]
async fn test_execute_before_initialize() {
  let engine = ExecutionEngine::new(EngineConfig::default(), registry(Arc::default()));

  let err = engine.execute("square", json!({"n": 2}), true).await.unwrap_err();
  assert_eq!(err, EngineError::NotStarted);

  let err = engine
    .execute_batch(vec![TaskRequest::new("square", json!({"n": 2}))], true)
    .await
    .unwrap_err();
  assert_eq!(err, EngineError::NotStarted);
}

#[tokio::test]
async fn test_lifecycle_is_idempotent_and_terminal() {
  let (engine, _) = engine();
  engine.initialize().unwrap();
  assert!(engine.is_running());

  engine.shutdown().await;
  engine.shutdown().await;
  assert!(!engine.is_running());

  assert_eq!(engine.initialize().unwrap_err(), EngineError::ShutDown);
  let err = engine.execute("square", json!({"n": 2}), true).await.unwrap_err();
  assert_eq!(err, EngineError::NotStarted);
}

#[tokio::test]
async fn test_unknown_task() {
  let (engine, _) = engine();
  let err = engine.execute("nope", json!({}), true).await.unwrap_err();
  assert_eq!(
    err,
    EngineError::UnknownTask {
      task_name: "nope".to_string()
    }
  );
  engine.shutdown().await;
}

#[tokio::test]
async fn test_cache_hit_skips_handler() {
  let (engine, calls) = engine();

  let first = engine.execute("square", json!({"n": 7}), true).await.unwrap();
  wait_for_cache_writes(&engine, 1).await;
  let second = engine.execute("square", json!({"n": 7}), true).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(first.data, json!(49));
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  let stats = engine.stats();
  let cache = stats.cache.expect("cache enabled by default");
  assert_eq!(cache.hits, 1);
  assert_eq!(stats.pool.executions, 1);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_cache_bypass_and_invalidate() {
  let (engine, calls) = engine();

  engine.execute("square", json!({"n": 3}), true).await.unwrap();
  wait_for_cache_writes(&engine, 1).await;
  engine.execute("square", json!({"n": 3}), false).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  engine.invalidate("square", &json!({"n": 3})).await;
  engine.execute("square", json!({"n": 3}), true).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_failures_are_results_and_not_cached() {
  let (engine, calls) = engine();

  let result = engine.execute("square", json!({"n": "x"}), true).await.unwrap();
  assert!(!result.success);
  assert!(result.error.unwrap().contains("n must be an integer"));

  engine.execute("square", json!({"n": "x"}), true).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  let failed = engine.execute("fail", json!({}), true).await.unwrap();
  assert_eq!(failed.error.as_deref(), Some("upstream unavailable"));
  engine.shutdown().await;
}

#[tokio::test]
async fn test_disabled_cache() {
  let mut config = EngineConfig::default();
  config.cache.enabled = false;
  let (engine, calls) = engine_with(config);

  engine.execute("square", json!({"n": 4}), true).await.unwrap();
  engine.execute("square", json!({"n": 4}), true).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert!(engine.stats().cache.is_none());
  engine.shutdown().await;
}

#[tokio::test]
async fn test_batch_preserves_order() {
  let (engine, _) = engine();

  // Warm one entry so the batch mixes hits and misses.
  engine.execute("square", json!({"n": 2}), true).await.unwrap();
  wait_for_cache_writes(&engine, 1).await;

  let requests = vec![
    TaskRequest::new("square", json!({"n": 1})),
    TaskRequest::new("fail", json!({})),
    TaskRequest::new("square", json!({"n": 2})),
    TaskRequest::new("seen", json!("hello")),
    TaskRequest::new("square", json!({"n": 3})),
  ];
  let results = engine.execute_batch(requests, true).await.unwrap();

  let data: Vec<Value> = results.iter().map(|r| r.data.clone()).collect();
  assert_eq!(
    data,
    vec![json!(1), Value::Null, json!(4), json!("hello"), json!(9)]
  );
  assert!(!results[1].success);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_batch_caches_successful_misses() {
  let (engine, calls) = engine();

  let requests = || {
    vec![
      TaskRequest::new("square", json!({"n": 1})),
      TaskRequest::new("square", json!({"n": 2})),
      TaskRequest::new("fail", json!({})),
    ]
  };

  let first = engine.execute_batch(requests(), true).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  wait_for_cache_writes(&engine, 2).await;

  let second = engine.execute_batch(requests(), true).await.unwrap();
  assert_eq!(first, second);
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  let cache = engine.stats().cache.unwrap();
  assert_eq!(cache.writes, 2);
  assert_eq!(cache.hits, 2);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_slow_cache_store_does_not_delay_results() {
  let mut config = EngineConfig::default();
  config.cache.write_timeout_ms = 60_000;
  let calls = Arc::new(AtomicUsize::new(0));
  let engine = ExecutionEngine::with_store(config, registry(calls), Arc::new(StuckStore));
  engine.initialize().unwrap();

  let result = tokio::time::timeout(
    Duration::from_secs(1),
    engine.execute("square", json!({"n": 6}), true),
  )
  .await
  .expect("execute should not wait on the cache write")
  .unwrap();
  assert_eq!(result.data, json!(36));

  let requests = (0..8)
    .map(|n| TaskRequest::new("square", json!({"n": n})))
    .collect();
  let results = tokio::time::timeout(Duration::from_secs(1), engine.execute_batch(requests, true))
    .await
    .expect("batch should not wait on cache writes")
    .unwrap();
  assert!(results.iter().all(|r| r.success));
  assert_eq!(engine.stats().cache.unwrap().writes, 0);
  // No shutdown: it would wait out the write timeout.
}

#[tokio::test]
async fn test_failing_cache_store_still_returns_results() {
  let calls = Arc::new(AtomicUsize::new(0));
  let engine = ExecutionEngine::with_store(
    EngineConfig::default(),
    registry(calls.clone()),
    Arc::new(ReadOnlyStore),
  );
  engine.initialize().unwrap();

  let result = engine.execute("square", json!({"n": 5}), true).await.unwrap();
  assert!(result.success);
  assert_eq!(result.data, json!(25));
  wait_for_cache_writes(&engine, 1).await;

  let cache = engine.stats().cache.unwrap();
  assert_eq!(cache.writes, 0);
  assert_eq!(cache.write_failures, 1);

  // Nothing was stored, so the handler runs again.
  engine.execute("square", json!({"n": 5}), true).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_batch_unknown_task_rejects_whole_batch() {
  let (engine, calls) = engine();
  let err = engine
    .execute_batch(
      vec![
        TaskRequest::new("square", json!({"n": 1})),
        TaskRequest::new("nope", json!({})),
      ],
      true,
    )
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnknownTask { .. }));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_batch_is_split_by_size() {
  let config = EngineConfig {
    batch: BatchConfig {
      batch_size: 2,
      batch_timeout_ms: 50,
      idle_interval_ms: 5,
    },
    ..EngineConfig::default()
  };
  let (engine, _) = engine_with(config);

  let requests = (0..5)
    .map(|n| TaskRequest::new("square", json!({"n": n})))
    .collect();
  let results = engine.execute_batch(requests, false).await.unwrap();
  assert_eq!(results.len(), 5);

  let coalescer = engine.stats().coalescer;
  assert_eq!(coalescer.executions, 5);
  assert!(coalescer.groups >= 3, "got {} groups", coalescer.groups);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_staged_context_propagation() {
  let (engine, _) = engine();

  let stages = vec![
    vec!["square".to_string()],
    vec!["seen".to_string(), "fail".to_string()],
  ];
  let staged = engine.execute_staged(&stages, json!({"n": 5})).await.unwrap();

  assert_eq!(staged.stages.len(), 2);
  assert_eq!(staged.stages[0]["square"].data, json!(25));

  let seen = &staged.stages[1]["seen"].data;
  assert_eq!(seen["n"], json!(5));
  assert_eq!(seen[STAGE_RESULTS_KEY], json!({"square": 25}));

  assert!(!staged.stages[1]["fail"].success);
  assert_eq!(staged.results["fail"], Value::Null);
  assert_eq!(staged.results["square"], json!(25));
  engine.shutdown().await;
}

#[tokio::test]
async fn test_staged_rejects_duplicate_task_in_stage() {
  let (engine, calls) = engine();

  let stages = vec![
    vec!["seen".to_string()],
    vec!["square".to_string(), "seen".to_string(), "square".to_string()],
  ];
  let err = engine
    .execute_staged(&stages, json!({"n": 2}))
    .await
    .unwrap_err();
  assert_eq!(
    err,
    EngineError::DuplicateStageTask {
      stage: 1,
      task_name: "square".to_string()
    }
  );
  // Rejected before any stage ran.
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert_eq!(engine.stats().coalescer.submitted, 0);
  engine.shutdown().await;
}

#[tokio::test]
async fn test_staged_wraps_non_object_context() {
  let (engine, _) = engine();

  let stages = vec![vec!["seen".to_string()]];
  let staged = engine.execute_staged(&stages, json!([1, 2])).await.unwrap();

  let seen = &staged.stages[0]["seen"].data;
  assert_eq!(seen["input"], json!([1, 2]));
  assert_eq!(seen[STAGE_RESULTS_KEY], json!({}));
  engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers() {
  let (engine, _) = engine();
  let engine = Arc::new(engine);

  let callers: Vec<_> = (0..16)
    .map(|n| {
      let engine = engine.clone();
      tokio::spawn(async move { engine.execute("square", json!({"n": n}), false).await })
    })
    .collect();

  for (n, caller) in callers.into_iter().enumerate() {
    let result = caller.await.unwrap().unwrap();
    assert_eq!(result.data, json!((n * n) as i64));
  }
  engine.shutdown().await;
}
