//! Execution engine settings.
//!
//! Durations are stored as integer milliseconds (or seconds for the cache
//! TTL) so the JSON form stays flat; accessor methods convert them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Floor for idle poll intervals; zero would turn the idle loops into spins.
const MIN_IDLE_INTERVAL_MS: u64 = 1;

/// Top-level settings for the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub pool: PoolConfig,
  pub batch: BatchConfig,
  pub cache: CacheConfig,
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  /// Number of concurrent workers.
  pub workers: usize,
  /// Capacity of the bounded work queue. Submitters wait when it is full.
  pub queue_capacity: usize,
  /// How long an idle worker waits on the queue before re-checking shutdown.
  pub poll_interval_ms: u64,
}

impl PoolConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(MIN_IDLE_INTERVAL_MS))
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      workers: 4,
      queue_capacity: 100,
      poll_interval_ms: 100,
    }
  }
}

/// Micro-batching window for the coalescer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  /// Maximum number of items collected into one batch.
  pub batch_size: usize,
  /// Maximum time spent collecting one batch.
  pub batch_timeout_ms: u64,
  /// Sleep between polls while nothing is pending.
  pub idle_interval_ms: u64,
}

impl BatchConfig {
  pub fn batch_timeout(&self) -> Duration {
    Duration::from_millis(self.batch_timeout_ms)
  }

  pub fn idle_interval(&self) -> Duration {
    Duration::from_millis(self.idle_interval_ms.max(MIN_IDLE_INTERVAL_MS))
  }
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      batch_size: 10,
      batch_timeout_ms: 50,
      idle_interval_ms: 10,
    }
  }
}

/// Result cache behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Globally disable cache reads and writes.
  pub enabled: bool,
  /// Time-to-live of cached results, in seconds.
  pub ttl_secs: u64,
  /// Namespace prepended to every cache key.
  pub key_prefix: String,
  /// Upper bound on a single cache write.
  pub write_timeout_ms: u64,
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  pub fn write_timeout(&self) -> Duration {
    Duration::from_millis(self.write_timeout_ms)
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: 300,
      key_prefix: "taskloom".to_string(),
      write_timeout_ms: 250,
    }
  }
}
