//! Result cache keyed by task fingerprint.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use taskloom_config::CacheConfig;
use taskloom_task::TaskResult;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::store::KvStore;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub writes: u64,
  pub write_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
  hits: AtomicU64,
  misses: AtomicU64,
  writes: AtomicU64,
  write_failures: AtomicU64,
}

/// Caches successful [`TaskResult`]s by (task name, context) fingerprint.
///
/// Every backend failure degrades to a miss on read and a skipped write on
/// write. Nothing in here returns an error to the caller.
#[derive(Clone)]
pub struct ResultCache {
  store: Arc<dyn KvStore>,
  ttl: Duration,
  key_prefix: String,
  write_timeout: Duration,
  counters: Arc<Counters>,
}

impl ResultCache {
  pub fn new(store: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
    Self {
      store,
      ttl: config.ttl(),
      key_prefix: config.key_prefix.clone(),
      write_timeout: config.write_timeout(),
      counters: Arc::new(Counters::default()),
    }
  }

  /// Stable content hash of a task name and its context.
  ///
  /// Object keys are sorted at every depth, so two contexts that differ only
  /// in key order share a fingerprint. Top-level keys starting with `_` are
  /// request bookkeeping (trace ids and the like) and do not take part.
  pub fn fingerprint(task_name: &str, context: &serde_json::Value) -> String {
    let mut canonical = String::new();
    match context {
      serde_json::Value::Object(map) => {
        let relevant = map
          .iter()
          .filter(|(key, _)| !key.starts_with('_'))
          .map(|(key, value)| (key.clone(), value.clone()))
          .collect();
        write_canonical(&serde_json::Value::Object(relevant), &mut canonical);
      }
      other => write_canonical(other, &mut canonical),
    }

    let mut hasher = Sha256::new();
    hasher.update(task_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
  }

  /// Full store key for a task invocation.
  pub fn key(&self, task_name: &str, context: &serde_json::Value) -> String {
    format!(
      "{}:{}:{}",
      self.key_prefix,
      task_name,
      Self::fingerprint(task_name, context)
    )
  }

  /// Look up a cached result.
  pub async fn get(&self, task_name: &str, context: &serde_json::Value) -> Option<TaskResult> {
    let key = self.key(task_name, context);

    let bytes = match self.store.get(&key).await {
      Ok(Some(bytes)) => bytes,
      Ok(None) => {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        return None;
      }
      Err(e) => {
        warn!(key = %key, error = %e, "cache read failed, treating as miss");
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        return None;
      }
    };

    match serde_json::from_slice::<TaskResult>(&bytes) {
      Ok(result) => {
        debug!(key = %key, "cache hit");
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(result)
      }
      Err(e) => {
        warn!(key = %key, error = %e, "cached entry is not a task result, treating as miss");
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Store a result. Failures are logged and swallowed.
  ///
  /// The write is bounded by the configured write timeout.
  pub async fn put(&self, task_name: &str, context: &serde_json::Value, result: &TaskResult) {
    let key = self.key(task_name, context);

    match self.try_put(&key, result).await {
      Ok(()) => {
        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "cached task result");
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
      }
      Err(e) => {
        warn!(key = %key, error = %e, "cache write failed");
        self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
      }
    }
  }

  async fn try_put(&self, key: &str, result: &TaskResult) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(result)?;
    tokio::time::timeout(self.write_timeout, self.store.setex(key, self.ttl, bytes))
      .await
      .map_err(|_| CacheError::Timeout {
        timeout_ms: self.write_timeout.as_millis() as u64,
      })?
  }

  /// Remove a cached result so the next call recomputes it.
  pub async fn invalidate(&self, task_name: &str, context: &serde_json::Value) {
    let key = self.key(task_name, context);
    if let Err(e) = self.store.delete(&key).await {
      warn!(key = %key, error = %e, "cache delete failed");
    }
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.counters.hits.load(Ordering::Relaxed),
      misses: self.counters.misses.load(Ordering::Relaxed),
      writes: self.counters.writes.load(Ordering::Relaxed),
      write_failures: self.counters.write_failures.load(Ordering::Relaxed),
    }
  }
}

/// Serialize JSON with object keys sorted, independent of map ordering.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
  match value {
    serde_json::Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        let _ = write!(out, "{}:", serde_json::Value::String(key.clone()));
        write_canonical(value, out);
      }
      out.push('}');
    }
    serde_json::Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    other => {
      let _ = write!(out, "{}", other);
    }
  }
}
