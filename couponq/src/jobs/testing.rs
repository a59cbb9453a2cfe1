//! Test-support handlers
//!
//! - [`RecordingHandler`]: succeeds and remembers every job it saw
//! - [`FailingHandler`]: always fails with a fixed message
//! - [`SlowHandler`]: sleeps before succeeding, for timeout tests
//! - [`FlakyStore`]: store wrapper that fails chosen operations
//!
//! # Example
//!
//! ```rust
//! use couponq::jobs::testing::RecordingHandler;
//! use couponq::jobs::{HandlerRegistry, JobClass};
//!
//! let recorder = RecordingHandler::new();
//! let registry = HandlerRegistry::new().register(JobClass::Email, recorder.clone());
//! assert!(recorder.is_empty());
//! # let _ = registry;
//! ```

use super::{Job, JobError, JobHandler, JobId, JobResult};
use crate::store::{KeyTtl, SharedStore, Store, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Handler that records each job and succeeds.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<Job>>>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs handled so far, in order.
    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        self.seen.lock().clone()
    }

    /// Ids of jobs handled so far, in order.
    #[must_use]
    pub fn ids(&self) -> Vec<JobId> {
        self.seen.lock().iter().map(|job| job.id.clone()).collect()
    }

    /// Number of jobs handled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether no job has been handled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, job: &Job) -> JobResult<()> {
        self.seen.lock().push(job.clone());
        Ok(())
    }
}

/// Handler that always fails.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    /// Fail every job with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingHandler {
    fn default() -> Self {
        Self::new("handler failed")
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn handle(&self, _job: &Job) -> JobResult<()> {
        Err(JobError::ExecutionFailed(self.message.clone()))
    }
}

/// Handler that sleeps for a fixed time and then succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SlowHandler {
    delay: Duration,
}

impl SlowHandler {
    /// Sleep `delay` per job.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn handle(&self, _job: &Job) -> JobResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Store wrapper that fails chosen operations a set number of times
/// before passing calls through again.
///
/// Operations are named after their [`Store`] method, e.g. `"blpop"`.
/// Clones share the same failure budget.
///
/// ```rust
/// use couponq::jobs::testing::FlakyStore;
/// use couponq::store::{MemoryStore, Store};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = FlakyStore::new(Arc::new(MemoryStore::new())).failing("rpush", 1);
/// assert!(store.rpush("q", "a").await.is_err());
/// assert_eq!(store.rpush("q", "a").await.unwrap(), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct FlakyStore {
    inner: SharedStore,
    budget: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("budget", &*self.budget.lock())
            .finish_non_exhaustive()
    }
}

impl FlakyStore {
    /// Wrap `inner` with no failures scheduled.
    #[must_use]
    pub fn new(inner: SharedStore) -> Self {
        Self {
            inner,
            budget: Arc::default(),
        }
    }

    /// Fail the next `times` calls of `op`.
    #[must_use]
    pub fn failing(self, op: &'static str, times: usize) -> Self {
        self.budget.lock().insert(op, times);
        self
    }

    /// Failures of `op` still scheduled.
    #[must_use]
    pub fn remaining(&self, op: &str) -> usize {
        self.budget.lock().get(op).copied().unwrap_or(0)
    }

    fn trip(&self, op: &'static str) -> StoreResult<()> {
        let mut budget = self.budget.lock();
        match budget.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(StoreError::Redis(
                    std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        format!("injected {op} failure"),
                    )
                    .into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn ping(&self) -> StoreResult<()> {
        self.trip("ping")?;
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.trip("get")?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.trip("set_ex")?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.trip("set_nx_ex")?;
        self.inner.set_nx_ex(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        self.trip("del")?;
        self.inner.del(key).await
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.trip("del_if_eq")?;
        self.inner.del_if_eq(key, expected).await
    }

    async fn incr(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.trip("incr")?;
        self.inner.incr(key, by).await
    }

    async fn incr_with_ttl(&self, key: &str) -> StoreResult<(i64, KeyTtl)> {
        self.trip("incr_with_ttl")?;
        self.inner.incr_with_ttl(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.trip("expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.trip("ttl")?;
        self.inner.ttl(key).await
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.trip("rpush")?;
        self.inner.rpush(key, value).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        self.trip("blpop")?;
        self.inner.blpop(key, timeout).await
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.trip("llen")?;
        self.inner.llen(key).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.trip("lrange")?;
        self.inner.lrange(key, start, stop).await
    }

    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<String>> {
        self.trip("lindex")?;
        self.inner.lindex(key, index).await
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> StoreResult<u64> {
        self.trip("lrem")?;
        self.inner.lrem(key, count, value).await
    }

    async fn take_list(&self, key: &str) -> StoreResult<u64> {
        self.trip("take_list")?;
        self.inner.take_list(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.trip("sadd")?;
        self.inner.sadd(key, member).await
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.trip("scard")?;
        self.inner.scard(key).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.trip("zadd")?;
        self.inner.zadd(key, member, score).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.trip("zrem")?;
        self.inner.zrem(key, member).await
    }

    async fn rpush_zrem(
        &self,
        list: &str,
        value: &str,
        zset: &str,
        member: &str,
    ) -> StoreResult<bool> {
        self.trip("rpush_zrem")?;
        self.inner.rpush_zrem(list, value, zset, member).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.trip("zcard")?;
        self.inner.zcard(key).await
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        self.trip("zincrby")?;
        self.inner.zincrby(key, member, delta).await
    }

    async fn zrevrange_withscores(&self, key: &str, n: usize) -> StoreResult<Vec<(String, f64)>> {
        self.trip("zrevrange_withscores")?;
        self.inner.zrevrange_withscores(key, n).await
    }

    async fn zrangebyscore(&self, key: &str, max: f64, n: usize) -> StoreResult<Vec<String>> {
        self.trip("zrangebyscore")?;
        self.inner.zrangebyscore(key, max, n).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobClass, Payload};

    fn job(id: &str) -> Job {
        Job::new(id.into(), JobClass::Email, Payload::new())
    }

    #[tokio::test]
    async fn test_recording_handler_shares_state_across_clones() {
        let recorder = RecordingHandler::new();
        let clone = recorder.clone();
        clone.handle(&job("email_a")).await.unwrap();
        clone.handle(&job("email_b")).await.unwrap();

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.ids(), vec![JobId::from("email_a"), JobId::from("email_b")]);
    }

    #[tokio::test]
    async fn test_failing_handler() {
        let err = FailingHandler::new("nope").handle(&job("email_a")).await.unwrap_err();
        assert_eq!(err.to_string(), "job execution failed: nope");
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let store =
            FlakyStore::new(Arc::new(crate::store::MemoryStore::new())).failing("blpop", 2);
        assert!(store.blpop("q", Duration::ZERO).await.is_err());
        assert_eq!(store.remaining("blpop"), 1);
        assert!(store.blpop("q", Duration::ZERO).await.is_err());
        assert_eq!(store.blpop("q", Duration::ZERO).await.unwrap(), None);
        assert!(store.rpush("q", "a").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_sleeps() {
        let started = tokio::time::Instant::now();
        SlowHandler::new(Duration::from_secs(3))
            .handle(&job("email_a"))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
