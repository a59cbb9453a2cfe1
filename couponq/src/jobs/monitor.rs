//! Queue inspection and dead-letter management.

use super::lease::Leases;
use super::observability::QueueObserver;
use super::{Job, JobClass, JobResult};
use crate::keys::Keyspace;
use crate::store::SharedStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Counters for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    /// Jobs waiting in the main queue.
    pub pending: u64,
    /// Jobs currently leased by a worker.
    pub processing: u64,
    /// Jobs in the dead-letter queue.
    pub dead_letter: u64,
}

impl std::ops::AddAssign for ClassStats {
    fn add_assign(&mut self, rhs: Self) {
        self.pending += rhs.pending;
        self.processing += rhs.processing;
        self.dead_letter += rhs.dead_letter;
    }
}

/// Snapshot of every monitored class plus cross-class totals.
///
/// Each counter is read with its own command, so the snapshot is not
/// transactionally consistent across counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Per-class counters.
    pub classes: BTreeMap<JobClass, ClassStats>,
    /// Sum over all classes.
    pub total: ClassStats,
}

impl QueueStats {
    /// Counters for `class`, zero if it is not monitored.
    #[must_use]
    pub fn class(&self, class: JobClass) -> ClassStats {
        self.classes.get(&class).copied().unwrap_or_default()
    }
}

/// Read-side view of the queues plus operator actions on dead letters.
#[derive(Clone)]
pub struct QueueMonitor {
    store: SharedStore,
    keys: Keyspace,
    classes: Vec<JobClass>,
    leases: Leases,
}

impl std::fmt::Debug for QueueMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMonitor")
            .field("keys", &self.keys)
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

impl QueueMonitor {
    /// Monitor for `classes`.
    #[must_use]
    pub fn new(store: SharedStore, keys: Keyspace, classes: &[JobClass]) -> Self {
        let leases = Leases::new(store.clone(), keys.clone(), Duration::ZERO);
        Self {
            store,
            keys,
            classes: classes.to_vec(),
            leases,
        }
    }

    /// Monitored classes.
    #[must_use]
    pub fn classes(&self) -> &[JobClass] {
        &self.classes
    }

    /// Counters for one class.
    ///
    /// # Errors
    ///
    /// Returns a store error if any counter cannot be read.
    pub async fn class_stats(&self, class: JobClass) -> JobResult<ClassStats> {
        Ok(ClassStats {
            pending: self.store.llen(&self.keys.queue(class)).await?,
            processing: self.store.zcard(&self.keys.processing(class)).await?,
            dead_letter: self.store.llen(&self.keys.dead_letter(class)).await?,
        })
    }

    /// Counters for every monitored class.
    ///
    /// # Errors
    ///
    /// Returns a store error if any counter cannot be read.
    pub async fn stats(&self) -> JobResult<QueueStats> {
        let mut stats = QueueStats::default();
        for &class in &self.classes {
            let class_stats = self.class_stats(class).await?;
            stats.total += class_stats;
            stats.classes.insert(class, class_stats);
        }
        Ok(stats)
    }

    /// Read `limit` dead-letter jobs starting at `offset`, in list order.
    ///
    /// # Errors
    ///
    /// Returns a store error, or a serialization error if an entry is not a
    /// job record.
    pub async fn list_dead_letter(
        &self,
        class: JobClass,
        offset: usize,
        limit: usize,
    ) -> JobResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = i64::try_from(offset).unwrap_or(i64::MAX);
        let stop = start.saturating_add(i64::try_from(limit).unwrap_or(i64::MAX) - 1);

        self.store
            .lrange(&self.keys.dead_letter(class), start, stop)
            .await?
            .iter()
            .map(|entry| Job::decode(class, entry))
            .collect()
    }

    /// Move the dead letter at `index` back to the main queue with its
    /// failure history cleared.
    ///
    /// The entry is removed by value, so with duplicate entries and a
    /// concurrent mutation a different copy may be the one removed. Returns
    /// false when `index` is out of range or the entry vanished before it
    /// could be removed.
    ///
    /// # Errors
    ///
    /// Returns a store error, or a serialization error if the entry is not a
    /// job record.
    pub async fn requeue_dead_letter(&self, class: JobClass, index: usize) -> JobResult<bool> {
        let dlq = self.keys.dead_letter(class);
        let Ok(index) = i64::try_from(index) else {
            return Ok(false);
        };
        let Some(raw) = self.store.lindex(&dlq, index).await? else {
            return Ok(false);
        };

        let mut job = Job::decode(class, &raw)?;
        job.reset_for_retry();
        let entry = job.to_entry()?;

        if self.store.lrem(&dlq, 1, &raw).await? == 0 {
            return Ok(false);
        }
        self.store.rpush(&self.keys.queue(class), &entry).await?;

        info!(job_id = %job.id, class = %class, "Requeued dead-letter job");
        Ok(true)
    }

    /// Move every dead letter present at call time back to the main queue.
    ///
    /// Entries that are not job records are pushed back onto the dead-letter
    /// tail and skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lists cannot be read or written.
    pub async fn requeue_all_dead_letter(&self, class: JobClass) -> JobResult<u64> {
        let dlq = self.keys.dead_letter(class);
        let queue = self.keys.queue(class);
        let present = self.store.llen(&dlq).await?;
        let mut requeued = 0;

        for _ in 0..present {
            let Some(raw) = self.store.blpop(&dlq, Duration::ZERO).await? else {
                break;
            };
            match Job::decode(class, &raw) {
                Ok(mut job) => {
                    job.reset_for_retry();
                    self.store.rpush(&queue, &job.to_entry()?).await?;
                    requeued += 1;
                }
                Err(err) => {
                    warn!(class = %class, error = %err, "Kept undecodable dead-letter entry");
                    self.store.rpush(&dlq, &raw).await?;
                }
            }
        }

        info!(class = %class, count = requeued, "Requeued all dead-letter jobs");
        Ok(requeued)
    }

    /// Delete the whole dead-letter queue, returning how many entries it held.
    ///
    /// # Errors
    ///
    /// Returns a store error if the list cannot be removed.
    pub async fn purge_dead_letter(&self, class: JobClass) -> JobResult<u64> {
        let removed = self.store.take_list(&self.keys.dead_letter(class)).await?;
        info!(class = %class, count = removed, "Purged dead-letter queue");
        Ok(removed)
    }

    /// Requeue jobs whose lease expired because their worker went away.
    ///
    /// # Errors
    ///
    /// Returns a store error if the processing set cannot be read or written.
    pub async fn reap_expired_leases(&self, class: JobClass) -> JobResult<u64> {
        let count = self.leases.reap_expired(class).await?;
        QueueObserver::log_reaped(class, count);
        Ok(count)
    }
}
