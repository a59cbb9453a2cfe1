//! In-flight leases and the reaper that recovers them.
//!
//! A popped job is recorded in its class's processing set as a lease
//! `{"owner", "jobId", "entry"}` scored by its expiry in unix milliseconds.
//! Acknowledging the job removes the lease. A lease still present after its
//! expiry belongs to a worker that died (or stalled past the handler
//! timeout), so the reaper puts its raw entry back on the main queue.

use super::{JobClass, JobId};
use crate::keys::Keyspace;
use crate::store::{SharedStore, StoreResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Leases fetched per reaper round trip.
const REAP_BATCH: usize = 100;

/// One in-flight claim on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Worker holding the lease.
    pub owner: String,
    /// Leased job, or a generated id for poison pills.
    pub job_id: JobId,
    /// Raw queue entry exactly as popped.
    pub entry: String,
}

/// Handle returned by [`Leases::acquire`], needed to release the lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    class: JobClass,
    member: String,
}

impl Lease {
    /// Class whose processing set holds the lease.
    #[must_use]
    pub const fn class(&self) -> JobClass {
        self.class
    }
}

/// Lease bookkeeping for every class.
#[derive(Clone)]
pub struct Leases {
    store: SharedStore,
    keys: Keyspace,
    ttl: Duration,
}

impl std::fmt::Debug for Leases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leases")
            .field("keys", &self.keys)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> f64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    #[allow(clippy::cast_precision_loss)]
    let expiry = now_ms().saturating_add(ttl_ms) as f64;
    expiry
}

impl Leases {
    /// Leases lasting `ttl` from acquisition.
    #[must_use]
    pub const fn new(store: SharedStore, keys: Keyspace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// Lease length.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `owner` is working on `entry`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lease could not be written.
    pub async fn acquire(
        &self,
        class: JobClass,
        owner: &str,
        job_id: &JobId,
        entry: &str,
    ) -> StoreResult<Lease> {
        let record = LeaseRecord {
            owner: owner.to_string(),
            job_id: job_id.clone(),
            entry: entry.to_string(),
        };
        let member = serde_json::to_string(&record)?;
        self.store
            .zadd(&self.keys.processing(class), &member, expiry_ms(self.ttl))
            .await?;
        Ok(Lease { class, member })
    }

    /// Drop a lease after the job was acknowledged.
    ///
    /// Returns false if the reaper already reclaimed it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lease could not be removed.
    pub async fn release(&self, lease: &Lease) -> StoreResult<bool> {
        self.store
            .zrem(&self.keys.processing(lease.class), &lease.member)
            .await
    }

    /// Push `entry` onto `list` and drop the lease in one atomic step, so
    /// the job is never both acknowledged elsewhere and still leased.
    ///
    /// Returns false if the reaper already reclaimed the lease.
    ///
    /// # Errors
    ///
    /// Returns a store error; neither write has happened in that case.
    pub async fn release_to(&self, lease: &Lease, list: &str, entry: &str) -> StoreResult<bool> {
        self.store
            .rpush_zrem(list, entry, &self.keys.processing(lease.class), &lease.member)
            .await
    }

    /// Requeue every lease of `class` that has expired by now.
    ///
    /// # Errors
    ///
    /// Returns a store error if the processing set cannot be read or written.
    pub async fn reap_expired(&self, class: JobClass) -> StoreResult<u64> {
        #[allow(clippy::cast_precision_loss)]
        let cutoff = now_ms() as f64;
        self.reap_before(class, cutoff).await
    }

    /// Requeue every lease of `class` whose expiry is at or before `cutoff_ms`.
    ///
    /// Each lease is claimed with `ZREM` first; only the caller whose removal
    /// succeeds requeues it, so concurrent reapers never duplicate a job.
    /// Attempts are left alone because a lost worker is not a handler failure.
    ///
    /// # Errors
    ///
    /// Returns a store error if the processing set cannot be read or written.
    pub async fn reap_before(&self, class: JobClass, cutoff_ms: f64) -> StoreResult<u64> {
        let processing = self.keys.processing(class);
        let queue = self.keys.queue(class);
        let mut requeued = 0;

        loop {
            let expired = self
                .store
                .zrangebyscore(&processing, cutoff_ms, REAP_BATCH)
                .await?;
            let batch_len = expired.len();

            for member in expired {
                if !self.store.zrem(&processing, &member).await? {
                    continue;
                }
                match serde_json::from_str::<LeaseRecord>(&member) {
                    Ok(record) => {
                        self.store.rpush(&queue, &record.entry).await?;
                        debug!(
                            class = %class,
                            job_id = %record.job_id,
                            owner = %record.owner,
                            "Requeued expired lease"
                        );
                        requeued += 1;
                    }
                    Err(err) => {
                        warn!(class = %class, error = %err, "Dropped unreadable lease record");
                    }
                }
            }

            if batch_len < REAP_BATCH {
                break;
            }
        }

        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use std::sync::Arc;

    fn leases(store: &MemoryStore, ttl: Duration) -> Leases {
        Leases::new(Arc::new(store.clone()), Keyspace::root(), ttl)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = MemoryStore::new();
        let leases = leases(&store, Duration::from_secs(60));
        let id = JobId::from("email_1");

        let lease = leases.acquire(JobClass::Email, "w0", &id, "{}").await.unwrap();
        assert_eq!(store.zcard("queue:email:processing").await.unwrap(), 1);

        assert!(leases.release(&lease).await.unwrap());
        assert!(!leases.release(&lease).await.unwrap());
        assert_eq!(store.zcard("queue:email:processing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_leases_are_not_reaped() {
        let store = MemoryStore::new();
        let leases = leases(&store, Duration::from_secs(600));
        leases
            .acquire(JobClass::Sms, "w0", &JobId::from("sms_1"), "raw")
            .await
            .unwrap();

        assert_eq!(leases.reap_expired(JobClass::Sms).await.unwrap(), 0);
        assert_eq!(store.llen("queue:sms").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_requeued_once() {
        let store = MemoryStore::new();
        let leases = leases(&store, Duration::ZERO);
        leases
            .acquire(JobClass::Cashback, "w0", &JobId::from("cashback_1"), "raw-entry")
            .await
            .unwrap();

        let cutoff = f64::MAX;
        assert_eq!(leases.reap_before(JobClass::Cashback, cutoff).await.unwrap(), 1);
        assert_eq!(leases.reap_before(JobClass::Cashback, cutoff).await.unwrap(), 0);
        assert_eq!(
            store.lrange("queue:cashback", 0, -1).await.unwrap(),
            vec!["raw-entry".to_string()]
        );
        assert_eq!(store.zcard("queue:cashback:processing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_to_moves_entry_and_drops_lease() {
        let store = MemoryStore::new();
        let leases = leases(&store, Duration::from_secs(60));
        let lease = leases
            .acquire(JobClass::Sms, "w0", &JobId::from("sms_1"), "raw")
            .await
            .unwrap();

        assert!(leases.release_to(&lease, "queue:sms:dlq", "failed").await.unwrap());
        assert_eq!(store.lrange("queue:sms:dlq", 0, -1).await.unwrap(), vec!["failed"]);
        assert_eq!(store.zcard("queue:sms:processing").await.unwrap(), 0);
    }

    #[test]
    fn test_record_wire_format() {
        let record = LeaseRecord {
            owner: "host-1:worker-0".into(),
            job_id: JobId::from("email_1"),
            entry: "{}".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["jobId"], "email_1");
        assert_eq!(json["owner"], "host-1:worker-0");
    }
}
