use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::CacheError;

/// Key-value store with per-key expiry.
///
/// This is the only surface the cache needs from its backend, so anything
/// Redis-like fits. Implementations report failures as [`CacheError`]; the
/// cache decides how to degrade.
#[async_trait]
pub trait KvStore: Send + Sync {
  /// Get a value by key. An expired or missing key is `Ok(None)`.
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

  /// Set a value that expires after `ttl`.
  async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), CacheError>;

  /// Delete a value.
  async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process store for tests and single-node deployments.
///
/// Expired entries are dropped lazily on read and on [`purge_expired`].
///
/// [`purge_expired`]: InMemoryKvStore::purge_expired
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
  data: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl InMemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored entries, including ones that expired but were not read yet.
  pub fn len(&self) -> usize {
    self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop every expired entry.
  pub fn purge_expired(&self) {
    let now = Instant::now();
    self
      .data
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .retain(|_, (_, expires_at)| *expires_at > now);
  }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
    match data.get(key) {
      Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
      Some(_) => {
        data.remove(key);
        Ok(None)
      }
      None => Ok(None),
    }
  }

  async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), CacheError> {
    let expires_at = Instant::now() + ttl;
    self
      .data
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_string(), (value, expires_at));
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    self
      .data
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(key);
    Ok(())
  }
}
