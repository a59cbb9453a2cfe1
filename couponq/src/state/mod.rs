//! Process-level handle on the shared store
//!
//! [`Dispatch`] owns the store connection for the life of the process and
//! hands out components that borrow it. Open it once at startup with
//! [`Dispatch::connect`] and close it at shutdown with [`Dispatch::close`].

use crate::cache::Cache;
use crate::config::CouponqConfig;
use crate::error::Result;
use crate::jobs::{HandlerRegistry, JobProducer, QueueMonitor, WorkerPool};
use crate::keys::Keyspace;
use crate::lock::Locks;
use crate::ranking::Rankings;
use crate::rate_limit::RateLimiter;
use crate::store::{MemoryStore, RedisStore, SharedStore, Store};
use std::sync::Arc;
use tracing::info;

/// Shared store plus the configuration every component is built from.
///
/// Cloning is cheap; clones share the same connection pool.
///
/// # Example
///
/// ```rust
/// use couponq::config::CouponqConfig;
/// use couponq::jobs::{JobClass, Payload};
/// use couponq::state::Dispatch;
///
/// # #[tokio::main]
/// # async fn main() -> couponq::error::Result<()> {
/// let dispatch = Dispatch::in_memory(CouponqConfig::default());
/// dispatch.producer().enqueue(JobClass::Sms, Payload::new(), None).await?;
///
/// let stats = dispatch.monitor().stats().await?;
/// assert_eq!(stats.class(JobClass::Sms).pending, 1);
/// dispatch.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatch {
    config: Arc<CouponqConfig>,
    store: SharedStore,
    redis: Option<RedisStore>,
    keys: Keyspace,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("keys", &self.keys)
            .field("redis", &self.redis)
            .finish_non_exhaustive()
    }
}

impl Dispatch {
    /// Open a Redis pool for `config` and check that the server answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the URL is
    /// malformed, or the server cannot be reached.
    pub async fn connect(config: CouponqConfig) -> Result<Self> {
        config.validate()?;
        let redis = RedisStore::connect(&config.redis.url, config.redis.pool_size)?;
        redis.ping().await?;

        info!(
            url = %config.redis.url,
            pool_size = config.redis.pool_size,
            namespace = config.redis.namespace.as_deref().unwrap_or(""),
            "Connected to Redis"
        );

        let keys = config.keyspace();
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(redis.clone()),
            redis: Some(redis),
            keys,
        })
    }

    /// Use a fresh in-process store; for development and tests.
    #[must_use]
    pub fn in_memory(config: CouponqConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Use an existing store.
    #[must_use]
    pub fn with_store(config: CouponqConfig, store: SharedStore) -> Self {
        let keys = config.keyspace();
        Self {
            config: Arc::new(config),
            store,
            redis: None,
            keys,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &CouponqConfig {
        &self.config
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Key builder for the configured namespace.
    #[must_use]
    pub const fn keys(&self) -> &Keyspace {
        &self.keys
    }

    /// TTL cache.
    #[must_use]
    pub fn cache(&self) -> Cache {
        Cache::new(self.store(), self.keys.clone())
    }

    /// Fixed-window rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.store(), self.keys.clone())
    }

    /// Named locks.
    #[must_use]
    pub fn locks(&self) -> Locks {
        Locks::new(self.store(), self.keys.clone())
    }

    /// Click and leaderboard rankings.
    #[must_use]
    pub fn rankings(&self) -> Rankings {
        Rankings::new(self.store(), self.keys.clone())
    }

    /// Producer accepting the configured classes.
    #[must_use]
    pub fn producer(&self) -> JobProducer {
        JobProducer::new(self.store(), self.keys.clone(), &self.config.queues.classes)
    }

    /// Producer accepting only the classes `registry` can handle.
    #[must_use]
    pub fn producer_for(&self, registry: &HandlerRegistry) -> JobProducer {
        JobProducer::new(self.store(), self.keys.clone(), &registry.classes())
    }

    /// Monitor over the configured classes.
    #[must_use]
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor::new(self.store(), self.keys.clone(), &self.config.queues.classes)
    }

    /// Worker pool sized and timed from configuration.
    #[must_use]
    pub fn worker_pool(&self, registry: HandlerRegistry) -> WorkerPool {
        WorkerPool::new(
            self.store(),
            self.keys.clone(),
            registry,
            self.config.worker.options(),
        )
        .concurrency(self.config.worker.concurrency)
    }

    /// Close the connection pool. Components built from this handle fail
    /// on their next store call.
    pub fn close(&self) {
        if let Some(redis) = &self.redis {
            redis.close();
            info!("Closed Redis pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::RecordingHandler;
    use crate::jobs::{JobClass, JobError, Payload};

    #[tokio::test]
    async fn test_components_share_one_store() {
        let dispatch = Dispatch::in_memory(CouponqConfig::default());
        dispatch
            .producer()
            .enqueue(JobClass::Email, Payload::new(), None)
            .await
            .unwrap();
        assert_eq!(dispatch.store().llen("queue:email").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_namespace_applies_to_components() {
        let mut config = CouponqConfig::default();
        config.redis.namespace = Some("test".into());
        let dispatch = Dispatch::in_memory(config);

        dispatch.locks().acquire("n", std::time::Duration::from_secs(5)).await.unwrap();
        assert!(dispatch.store().get("test:lock:n").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_uses_namespace() {
        let mut config = CouponqConfig::default();
        config.redis.namespace = Some("test".into());
        let dispatch = Dispatch::in_memory(config);

        dispatch
            .cache()
            .set("k", &serde_json::json!(1), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(dispatch.store().get("test:k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_producer_for_registry_rejects_unhandled_classes() {
        let dispatch = Dispatch::in_memory(CouponqConfig::default());
        let registry = HandlerRegistry::new().register(JobClass::Sms, RecordingHandler::new());

        let err = dispatch
            .producer_for(&registry)
            .enqueue(JobClass::Email, Payload::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UnregisteredClass(JobClass::Email)));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let mut config = CouponqConfig::default();
        config.worker.concurrency = 0;
        assert!(Dispatch::connect(config).await.is_err());
    }
}
