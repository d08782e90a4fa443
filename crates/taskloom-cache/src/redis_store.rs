//! Redis-backed key-value store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use crate::error::CacheError;
use crate::store::KvStore;

/// Shared Redis store behind a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisKvStore {
  conn: ConnectionManager,
}

impl RedisKvStore {
  /// Connect to Redis.
  pub async fn connect(url: &str) -> Result<Self, CacheError> {
    info!(url = %url, "connecting to redis");

    let client = Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
    let conn = ConnectionManager::new(client)
      .await
      .map_err(|e| CacheError::Unavailable(e.to_string()))?;

    info!("connected to redis");
    Ok(Self { conn })
  }
}

#[async_trait]
impl KvStore for RedisKvStore {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    let mut conn = self.conn.clone();
    conn
      .get::<_, Option<Vec<u8>>>(key)
      .await
      .map_err(|e| CacheError::Operation(e.to_string()))
  }

  async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), CacheError> {
    let mut conn = self.conn.clone();
    // Redis rejects a zero expiry.
    let seconds = ttl.as_secs().max(1);
    conn
      .set_ex::<_, _, ()>(key, value, seconds)
      .await
      .map_err(|e| CacheError::Operation(e.to_string()))
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    let mut conn = self.conn.clone();
    conn
      .del::<_, ()>(key)
      .await
      .map_err(|e| CacheError::Operation(e.to_string()))
  }
}
