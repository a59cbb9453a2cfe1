//! Fixed-window rate limiting
//!
//! Each identifier owns a counter that is incremented per call and expires
//! one window after the first increment, which resets the window entirely.
//! Correctness across processes rests on the atomic `INCR` + `TTL` pipeline;
//! there is no in-process locking.
//!
//! # Example
//!
//! ```rust
//! use couponq::keys::Keyspace;
//! use couponq::rate_limit::RateLimiter;
//! use couponq::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> couponq::store::StoreResult<()> {
//! let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), Keyspace::root());
//! let decision = limiter.check("otp:+919876543210", 3, Duration::from_secs(600)).await?;
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 2);
//! # Ok(())
//! # }
//! ```

use crate::keys::Keyspace;
use crate::store::{KeyTtl, SharedStore, StoreResult};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether this call is within the limit.
    pub allowed: bool,
    /// Calls left in the current window.
    pub remaining: u64,
    /// Seconds until the window resets.
    pub ttl_secs: u64,
}

/// Fixed-window limiter over the shared store.
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    keys: Keyspace,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub const fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    /// Count one call for `identifier` and decide whether it is allowed.
    ///
    /// The window starts with the first call; its expiry is set only when
    /// the counter has none, so later calls never extend it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the counter cannot be updated.
    pub async fn check(
        &self,
        identifier: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<RateLimitDecision> {
        let key = self.keys.rate_limit(identifier);
        let (count, ttl) = self.store.incr_with_ttl(&key).await?;

        let ttl_secs = match ttl {
            KeyTtl::Persistent => {
                self.store.expire(&key, window).await?;
                window.as_secs().max(1)
            }
            KeyTtl::Expires(secs) => secs,
            KeyTtl::Missing => 0,
        };

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let decision = RateLimitDecision {
            allowed: count <= limit,
            remaining: u64::try_from(limit.saturating_sub(count)).unwrap_or(0),
            ttl_secs,
        };

        if !decision.allowed {
            debug!(identifier, count, limit, ttl_secs, "Rate limit exceeded");
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), Keyspace::root())
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down_then_denies() {
        let limiter = limiter();
        let window = Duration::from_secs(60);

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let decision = limiter.check("user:1", 5, window).await.unwrap();
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = limiter.check("user:1", 5, window).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_are_independent() {
        let limiter = limiter();
        let window = Duration::from_secs(60);
        limiter.check("a", 1, window).await.unwrap();
        assert!(!limiter.check("a", 1, window).await.unwrap().allowed);
        assert!(limiter.check("b", 1, window).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_expiry() {
        let limiter = limiter();
        let window = Duration::from_secs(10);
        limiter.check("ip:10.0.0.1", 1, window).await.unwrap();
        assert!(!limiter.check("ip:10.0.0.1", 1, window).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = limiter.check("ip:10.0.0.1", 1, window).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.ttl_secs, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_set_only_on_first_call() {
        let limiter = limiter();
        let window = Duration::from_secs(60);

        let first = limiter.check("user:2", 100, window).await.unwrap();
        assert_eq!(first.ttl_secs, 60);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            let next = limiter.check("user:2", 100, window).await.unwrap();
            assert!(next.ttl_secs <= first.ttl_secs);
        }
        let last = limiter.check("user:2", 100, window).await.unwrap();
        assert_eq!(last.ttl_secs, 45);
    }
}
