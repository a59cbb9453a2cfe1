//! Best-effort mutual exclusion with owner tokens.
//!
//! A lock is a key set with `NX` and an expiry. Each acquisition stores a
//! fresh random token, and release deletes the key only while it still
//! holds that token, so a holder whose lock expired and was taken by
//! someone else cannot release the new holder's lock.
//!
//! Contention is a normal outcome, reported as `None`, not an error.

use crate::keys::Keyspace;
use crate::store::{SharedStore, StoreResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Proof of a successful acquisition, needed to release.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a lock that is never released stays held until its TTL expires"]
pub struct LockGuard {
    name: String,
    key: String,
    token: String,
}

impl LockGuard {
    /// Lock name as passed to [`Locks::acquire`].
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner token stored in the lock key.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Named locks over the shared store.
///
/// # Examples
///
/// ```rust
/// use couponq::keys::Keyspace;
/// use couponq::lock::Locks;
/// use couponq::store::MemoryStore;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> couponq::store::StoreResult<()> {
/// let locks = Locks::new(Arc::new(MemoryStore::new()), Keyspace::root());
///
/// let guard = locks.acquire("cashback-sync", Duration::from_secs(30)).await?;
/// assert!(guard.is_some());
/// assert!(locks.acquire("cashback-sync", Duration::from_secs(30)).await?.is_none());
///
/// if let Some(guard) = guard {
///     locks.release(guard).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Locks {
    store: SharedStore,
    keys: Keyspace,
}

impl std::fmt::Debug for Locks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locks")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Locks {
    /// Create a lock manager.
    #[must_use]
    pub const fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    /// Try once to take `name` for `ttl`. Never blocks or retries.
    ///
    /// # Errors
    ///
    /// Returns a store error if the attempt could not be made.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> StoreResult<Option<LockGuard>> {
        let key = self.keys.lock(name);
        let token = Uuid::new_v4().to_string();

        if self.store.set_nx_ex(&key, &token, ttl).await? {
            debug!(lock = name, ttl_secs = ttl.as_secs(), "Lock acquired");
            Ok(Some(LockGuard {
                name: name.to_string(),
                key,
                token,
            }))
        } else {
            debug!(lock = name, "Lock busy");
            Ok(None)
        }
    }

    /// Release `guard` if it still owns the lock.
    ///
    /// Returns false when the lock had expired and was possibly taken by
    /// another holder; in that case nothing is deleted.
    ///
    /// # Errors
    ///
    /// Returns a store error if the release could not be attempted.
    pub async fn release(&self, guard: LockGuard) -> StoreResult<bool> {
        let released = self.store.del_if_eq(&guard.key, &guard.token).await?;
        if !released {
            warn!(lock = %guard.name, "Lock expired before release");
        }
        Ok(released)
    }

    /// Run `task` while holding `name`.
    ///
    /// Returns `None` without running `task` if the lock is held elsewhere.
    /// The lock is released after `task` finishes.
    ///
    /// # Errors
    ///
    /// Returns a store error if acquiring or releasing fails.
    pub async fn run_exclusive<F, T>(
        &self,
        name: &str,
        ttl: Duration,
        task: F,
    ) -> StoreResult<Option<T>>
    where
        F: Future<Output = T>,
    {
        let Some(guard) = self.acquire(name, ttl).await? else {
            return Ok(None);
        };
        let output = task.await;
        self.release(guard).await?;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use std::sync::Arc;

    fn locks(store: &MemoryStore) -> Locks {
        Locks::new(Arc::new(store.clone()), Keyspace::root())
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_fails_until_ttl_elapses() {
        let store = MemoryStore::new();
        let locks = locks(&store);
        let ttl = Duration::from_secs(2);

        assert!(locks.acquire("x", ttl).await.unwrap().is_some());
        assert!(locks.acquire("x", ttl).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(locks.acquire("x", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_holder_cannot_release_new_holder() {
        let store = MemoryStore::new();
        let locks = locks(&store);
        let ttl = Duration::from_secs(1);

        let stale = locks.acquire("sync", ttl).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let current = locks.acquire("sync", ttl).await.unwrap().unwrap();
        assert_ne!(stale.token(), current.token());

        assert!(!locks.release(stale).await.unwrap());
        assert_eq!(
            store.get("lock:sync").await.unwrap().as_deref(),
            Some(current.token())
        );
        assert!(locks.release(current).await.unwrap());
        assert_eq!(store.get("lock:sync").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_exclusive() {
        let store = MemoryStore::new();
        let locks = locks(&store);
        let ttl = Duration::from_secs(30);

        let ran = locks.run_exclusive("job", ttl, async { 7 }).await.unwrap();
        assert_eq!(ran, Some(7));
        assert_eq!(store.key_count(), 0);

        let held = locks.acquire("job", ttl).await.unwrap().unwrap();
        let skipped = locks.run_exclusive("job", ttl, async { 8 }).await.unwrap();
        assert_eq!(skipped, None);
        assert!(locks.release(held).await.unwrap());
    }
}
