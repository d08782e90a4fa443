//! Taskloom Cache
//!
//! Content-addressed caching of task results. A [`ResultCache`] hashes the
//! task name and a canonical form of the invocation context into a key,
//! and stores serialized results in any [`KvStore`] with a TTL.
//!
//! Backends:
//! - [`InMemoryKvStore`] for tests and single-process use
//! - `RedisKvStore` (feature `redis`) for a shared cache

mod cache;
mod error;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use cache::{CacheStats, ResultCache};
pub use error::CacheError;
#[cfg(feature = "redis")]
pub use redis_store::RedisKvStore;
pub use store::{InMemoryKvStore, KvStore};
