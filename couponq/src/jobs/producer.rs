//! Enqueueing jobs onto class queues.

use super::observability::QueueObserver;
use super::payload::TypedPayload;
use super::{Job, JobClass, JobError, JobId, JobResult, Payload};
use crate::keys::Keyspace;
use crate::store::SharedStore;
use std::collections::BTreeSet;

/// Appends jobs to the tail of their class queue.
///
/// Enqueueing never waits on workers. Classes outside the configured set
/// are rejected before the store is touched.
///
/// # Examples
///
/// ```rust
/// use couponq::jobs::{JobClass, JobProducer, Payload};
/// use couponq::keys::Keyspace;
/// use couponq::store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> couponq::jobs::JobResult<()> {
/// let producer = JobProducer::new(Arc::new(MemoryStore::new()), Keyspace::root(), &JobClass::ALL);
/// let id = producer.enqueue(JobClass::Email, Payload::new(), None).await?;
/// assert!(id.as_str().starts_with("email_"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JobProducer {
    store: SharedStore,
    keys: Keyspace,
    classes: BTreeSet<JobClass>,
}

impl std::fmt::Debug for JobProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProducer")
            .field("keys", &self.keys)
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

impl JobProducer {
    /// Producer that accepts jobs for `classes`.
    #[must_use]
    pub fn new(store: SharedStore, keys: Keyspace, classes: &[JobClass]) -> Self {
        Self {
            store,
            keys,
            classes: classes.iter().copied().collect(),
        }
    }

    /// Classes this producer accepts.
    #[must_use]
    pub fn classes(&self) -> Vec<JobClass> {
        self.classes.iter().copied().collect()
    }

    /// Enqueue a job and return its id.
    ///
    /// A fresh `<class>_<hex>` id is generated when `id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnregisteredClass`] for a class this producer
    /// does not accept, or a store error if the push fails.
    pub async fn enqueue(
        &self,
        class: JobClass,
        payload: Payload,
        id: Option<JobId>,
    ) -> JobResult<JobId> {
        if !self.classes.contains(&class) {
            return Err(JobError::UnregisteredClass(class));
        }

        let id = id.unwrap_or_else(|| JobId::generate(class));
        let job = Job::new(id, class, payload);
        let entry = job.to_entry()?;

        let queue_len = self.store.rpush(&self.keys.queue(class), &entry).await?;
        QueueObserver::log_enqueued(&job.id, class, queue_len);

        Ok(job.id)
    }

    /// Enqueue a typed payload under its own class.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](Self::enqueue), plus serialization failures.
    pub async fn enqueue_payload<P: TypedPayload + Sync>(
        &self,
        payload: &P,
        id: Option<JobId>,
    ) -> JobResult<JobId> {
        self.enqueue(P::CLASS, payload.to_payload()?, id).await
    }
}
