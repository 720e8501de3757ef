//! Typed facade over the coordination store shared by every babelgrid
//! instance.
//!
//! All cross-instance state (the task queue, the processing set, credential
//! counters, cluster membership) lives behind the [`Store`] trait. Two
//! implementations ship with the crate:
//!
//! - [`RedisStore`], the production backend on a managed Redis connection
//!   that reconnects on failure, and
//! - [`MemoryStore`], a single-process double with the same TTL semantics,
//!   used throughout the test suites.
//!
//! Callers are expected to treat counter operations as best-effort (fail
//! open when the store is unreachable) but the queue and claim-set
//! operations as authoritative; the trait surfaces every failure as a
//! [`StoreError`] and leaves that policy to the caller.

mod error;
mod memory;
mod redis_store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Atomic primitives required by the dispatch fabric.
///
/// The surface intentionally mirrors the subset of Redis the system uses:
/// strings with TTLs, counters, lists with blocking pop, sets, and hashes.
/// Every operation is fallible; none of them panic.
#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trips a liveness probe to the backend.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets `key` to `value`, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Sets `key` only if it does not already exist. Returns whether the
    /// write happened. Used for the cluster scaling lock.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Increments a counter, applying `ttl` only when this call created the
    /// key. The returned value is the post-increment count.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError>;

    /// Adds `delta` to a counter without touching its TTL.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Blocking right-pop. Resolves with `None` once `timeout` elapses with
    /// the list still empty; otherwise `(key, value)`.
    async fn brpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError>;

    async fn llen(&self, key: &str) -> Result<u64, StoreError>;

    /// Returns whether the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns whether the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
}
