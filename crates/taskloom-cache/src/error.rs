use thiserror::Error;

/// Errors from a cache backend.
///
/// These never reach engine callers; the cache logs them and treats the
/// operation as a miss or a skipped write.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache backend unavailable: {0}")]
  Unavailable(String),

  #[error("cache operation failed: {0}")]
  Operation(String),

  #[error("cache write timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("failed to encode cached result: {0}")]
  Serialization(#[from] serde_json::Error),
}
