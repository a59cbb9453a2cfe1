//! Backing store abstraction
//!
//! Every component in this crate talks to the shared store through the
//! [`Store`] trait. Each method maps onto a single Redis command (or one
//! atomic `MULTI`/`EXEC` pipeline where noted), so callers inherit Redis'
//! per-operation atomicity and nothing else.
//!
//! Two implementations are provided:
//!
//! - [`RedisStore`]: production backend over a `deadpool-redis` pool
//! - [`MemoryStore`]: in-process backend for development and tests
//!
//! # Example
//!
//! ```rust
//! use couponq::store::{MemoryStore, Store};
//!
//! # async fn example() -> couponq::store::StoreResult<()> {
//! let store = MemoryStore::new();
//! store.rpush("queue:email", "{}").await?;
//! assert_eq!(store.llen("queue:email").await?, 1);
//! # Ok(())
//! # }
//! ```

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to a store implementation.
pub type SharedStore = Arc<dyn Store>;

/// Errors surfaced by the backing store.
///
/// Store failures are never masked: every component hands them back to its
/// caller, who decides between retrying and failing fast.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not check a connection out of the pool.
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Could not build the connection pool.
    #[error("redis pool creation failed: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// Command failed on the server or the connection dropped.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Key holds a value of a different type than the command expects.
    #[error("wrong type for key {key}: expected {expected}")]
    WrongType {
        /// Offending key
        key: String,
        /// Type the command needed
        expected: &'static str,
    },

    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Time-to-live reported for a key.
///
/// Mirrors the three outcomes of Redis' `TTL` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist (`-2`).
    Missing,
    /// Key exists without an expiry (`-1`).
    Persistent,
    /// Key expires in this many seconds.
    Expires(u64),
}

impl KeyTtl {
    /// Decode the integer reply of `TTL`.
    #[must_use]
    pub const fn from_reply(reply: i64) -> Self {
        match reply {
            -1 => Self::Persistent,
            r if r < 0 => Self::Missing,
            #[allow(clippy::cast_sign_loss)]
            r => Self::Expires(r as u64),
        }
    }
}

/// Primitive operations the components rely on.
///
/// Implementations must make each call atomic with respect to every other
/// call on the same store. Nothing here spans more than one round trip;
/// the `MULTI` helpers run as one atomic pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check connectivity.
    async fn ping(&self) -> StoreResult<()>;

    // -- strings ---------------------------------------------------------

    /// `GET key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET key value EX ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// `SET key value NX EX ttl`; true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// `DEL key`; number of keys removed.
    async fn del(&self, key: &str) -> StoreResult<u64>;

    /// Delete `key` only while it still holds `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// `INCRBY key by`
    async fn incr(&self, key: &str, by: i64) -> StoreResult<i64>;

    /// `MULTI; INCR key; TTL key; EXEC`
    async fn incr_with_ttl(&self, key: &str) -> StoreResult<(i64, KeyTtl)>;

    /// `EXPIRE key ttl`; false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// `TTL key`
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    // -- lists -----------------------------------------------------------

    /// `RPUSH key value`; new length.
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// `BLPOP key timeout`; `None` once the timeout elapses.
    ///
    /// A zero timeout performs a non-blocking `LPOP` instead of blocking
    /// forever.
    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// `LLEN key`
    async fn llen(&self, key: &str) -> StoreResult<u64>;

    /// `LRANGE key start stop` (inclusive, negative indexes from the tail).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// `LINDEX key index`
    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<String>>;

    /// `LREM key count value`; number of entries removed.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> StoreResult<u64>;

    /// `MULTI; LLEN key; DEL key; EXEC`; length the list had.
    async fn take_list(&self, key: &str) -> StoreResult<u64>;

    // -- sets ------------------------------------------------------------

    /// `SADD key member`; true when the member was new.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// `SCARD key`
    async fn scard(&self, key: &str) -> StoreResult<u64>;

    // -- sorted sets -----------------------------------------------------

    /// `ZADD key score member`
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// `ZREM key member`; true when the member was present.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// `MULTI; RPUSH list value; ZREM zset member; EXEC`; true when the
    /// member was present. Either both writes land or neither does.
    async fn rpush_zrem(
        &self,
        list: &str,
        value: &str,
        zset: &str,
        member: &str,
    ) -> StoreResult<bool>;

    /// `ZCARD key`
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// `ZINCRBY key delta member`; the new score.
    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64>;

    /// `ZREVRANGE key 0 n-1 WITHSCORES`
    async fn zrevrange_withscores(&self, key: &str, n: usize) -> StoreResult<Vec<(String, f64)>>;

    /// `ZRANGEBYSCORE key -inf max LIMIT 0 n`
    async fn zrangebyscore(&self, key: &str, max: f64, n: usize) -> StoreResult<Vec<String>>;
}
