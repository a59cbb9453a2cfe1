//! Worker loop and worker pool.
//!
//! A [`Worker`] visits every registered class in a fixed round-robin order.
//! For each class it blocks on the main queue for at most the poll timeout,
//! leases what it pops, runs the class handler and then acknowledges the
//! job. Success discards the job; failure appends it to the dead-letter
//! queue with its attempt count bumped.
//!
//! A [`WorkerPool`] runs several workers against the same queues plus one
//! lease reaper. Pops are exclusive in the store, so workers need no
//! coordination of their own.

use super::handler::HandlerRegistry;
use super::lease::{Lease, Leases};
use super::observability::{JobExecutionContext, QueueObserver};
use super::shutdown::ShutdownSignal;
use super::{Job, JobClass, JobError, JobId, JobResult};
use crate::keys::Keyspace;
use crate::store::SharedStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time a lease must outlast the handler timeout by.
const LEASE_MARGIN: Duration = Duration::from_secs(1);

/// Timing and retry settings for workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Longest a single queue poll blocks.
    pub poll_timeout: Duration,
    /// Pause after a store error before polling again.
    pub retry_delay: Duration,
    /// Longest a handler may run before it counts as failed.
    pub handler_timeout: Duration,
    /// Lease length; must exceed `handler_timeout`.
    pub lease_ttl: Duration,
    /// How often the pool's reaper looks for expired leases.
    pub reap_interval: Duration,
    /// Attempts after which a failure is logged as exhausted.
    pub max_attempts: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            handler_timeout: Duration::from_secs(300),
            lease_ttl: Duration::from_secs(600),
            reap_interval: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl WorkerOptions {
    /// Copy with `lease_ttl` raised to outlive a handler that runs to its
    /// timeout. A shorter lease would let the reaper requeue a job that is
    /// still running.
    #[must_use]
    pub fn with_safe_lease(mut self) -> Self {
        let floor = self.handler_timeout.saturating_add(LEASE_MARGIN);
        if self.lease_ttl < floor {
            warn!(
                lease_ttl_ms = u64::try_from(self.lease_ttl.as_millis()).unwrap_or(u64::MAX),
                raised_to_ms = u64::try_from(floor.as_millis()).unwrap_or(u64::MAX),
                "Lease shorter than handler timeout; raising it"
            );
            self.lease_ttl = floor;
        }
        self
    }
}

/// What one poll of one class did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Queue stayed empty for the whole poll timeout.
    Idle,
    /// Handler succeeded; the job was discarded.
    Succeeded(JobId),
    /// Handler failed; the job is in the dead-letter queue.
    Failed(JobId),
    /// Entry could not be decoded and was wrapped into the dead-letter queue.
    Poisoned(JobId),
}

/// Per-class outcomes of one round-robin cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Outcomes in the order classes were polled.
    pub outcomes: Vec<(JobClass, PollOutcome)>,
}

impl CycleReport {
    /// Jobs popped during the cycle.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome != PollOutcome::Idle)
            .count()
    }

    /// Jobs whose handler succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, PollOutcome::Succeeded(_)))
    }

    /// Jobs that went to the dead-letter queue, poison pills included.
    #[must_use]
    pub fn dead_lettered(&self) -> usize {
        self.count(|o| matches!(o, PollOutcome::Failed(_) | PollOutcome::Poisoned(_)))
    }

    /// Outcome for `class`, if it was polled.
    #[must_use]
    pub fn outcome(&self, class: JobClass) -> Option<&PollOutcome> {
        self.outcomes
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&PollOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// A single polling loop over every registered class.
#[derive(Clone)]
pub struct Worker {
    name: String,
    store: SharedStore,
    keys: Keyspace,
    registry: HandlerRegistry,
    leases: Leases,
    options: WorkerOptions,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Worker named `name`; the name is recorded as the owner of its leases.
    ///
    /// `options` pass through [`WorkerOptions::with_safe_lease`].
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: SharedStore,
        keys: Keyspace,
        registry: HandlerRegistry,
        options: WorkerOptions,
    ) -> Self {
        let options = options.with_safe_lease();
        let leases = Leases::new(store.clone(), keys.clone(), options.lease_ttl);
        Self {
            name: name.into(),
            store,
            keys,
            registry,
            leases,
            options,
        }
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Poll every registered class once, in order.
    ///
    /// # Errors
    ///
    /// Returns the first store error; classes after it are not polled.
    pub async fn run_once(&self) -> JobResult<CycleReport> {
        let mut report = CycleReport::default();
        for class in self.registry.classes() {
            let outcome = self.poll_class(class).await?;
            report.outcomes.push((class, outcome));
        }
        Ok(report)
    }

    /// Run until `shutdown` triggers.
    ///
    /// Shutdown is checked before each poll. Store errors are logged and
    /// retried after the configured delay.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let classes = self.registry.classes();
        info!(worker = %self.name, classes = ?classes, "Worker started");

        if classes.is_empty() {
            warn!(worker = %self.name, "No handlers registered; waiting for shutdown");
            shutdown.triggered().await;
        }

        'outer: while !shutdown.is_triggered() {
            for &class in &classes {
                if shutdown.is_triggered() {
                    break 'outer;
                }
                if let Err(err) = self.poll_class(class).await {
                    error!(
                        worker = %self.name,
                        class = %class,
                        error = %err,
                        retry_in_ms = u64::try_from(self.options.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "Queue poll failed"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(self.options.retry_delay) => {}
                        () = shutdown.triggered() => break 'outer,
                    }
                }
            }
        }

        info!(worker = %self.name, "Worker stopped");
    }

    /// Pop and process at most one job of `class`.
    ///
    /// # Errors
    ///
    /// Returns a store error. A job popped before the error is either put
    /// back on its queue or left leased for the reaper to recover.
    pub async fn poll_class(&self, class: JobClass) -> JobResult<PollOutcome> {
        let queue = self.keys.queue(class);
        let Some(raw) = self.store.blpop(&queue, self.options.poll_timeout).await? else {
            return Ok(PollOutcome::Idle);
        };

        // The queue decides the class: entries naming another class are
        // isolated like any other undecodable entry.
        let job = match Job::decode(class, &raw) {
            Ok(job) => job,
            Err(err) => return self.dead_letter_poison(class, &raw, &err).await,
        };

        let lease = match self.leases.acquire(class, &self.name, &job.id, &raw).await {
            Ok(lease) => lease,
            Err(err) => {
                self.return_to_queue(&queue, &raw, &job.id).await;
                return Err(err.into());
            }
        };

        self.execute(job, &lease).await
    }

    async fn execute(&self, mut job: Job, lease: &Lease) -> JobResult<PollOutcome> {
        let class = lease.class();
        let ctx = JobExecutionContext::new(&job, &self.name, self.options.max_attempts);
        ctx.log_start();

        let result = match self.registry.get(class) {
            Some(handler) => {
                match tokio::time::timeout(self.options.handler_timeout, handler.handle(&job)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(JobError::Timeout(self.options.handler_timeout)),
                }
            }
            None => Err(JobError::UnregisteredClass(class)),
        };

        match result {
            Ok(()) => {
                self.leases.release(lease).await?;
                ctx.log_completion();
                Ok(PollOutcome::Succeeded(job.id))
            }
            Err(err) => {
                let message = err.to_string();
                job.record_failure(message.as_str());
                let released = self
                    .leases
                    .release_to(lease, &self.keys.dead_letter(class), &job.to_entry()?)
                    .await?;
                if !released {
                    warn!(
                        job_id = %job.id,
                        class = %class,
                        "Lease was reaped before the job failed; it may also be pending again"
                    );
                }
                ctx.log_failure(job.attempts, &message);
                Ok(PollOutcome::Failed(job.id))
            }
        }
    }

    async fn dead_letter_poison(
        &self,
        class: JobClass,
        raw: &str,
        decode_error: &JobError,
    ) -> JobResult<PollOutcome> {
        let wrapper = Job::poison(class, raw, &decode_error.to_string());
        self.store
            .rpush(&self.keys.dead_letter(class), &wrapper.to_entry()?)
            .await?;
        QueueObserver::log_poison(class, &decode_error.to_string());
        Ok(PollOutcome::Poisoned(wrapper.id))
    }

    async fn return_to_queue(&self, queue: &str, raw: &str, job_id: &JobId) {
        match self.store.rpush(queue, raw).await {
            Ok(_) => debug!(job_id = %job_id, "Returned job to queue after lease failure"),
            Err(err) => error!(
                job_id = %job_id,
                error = %err,
                entry = raw,
                "Job lost: could not lease or requeue it"
            ),
        }
    }
}

/// Builder for a set of workers sharing one registry.
///
/// # Examples
///
/// ```rust
/// use couponq::jobs::{HandlerRegistry, JobClass, WorkerOptions, WorkerPool};
/// use couponq::keys::Keyspace;
/// use couponq::store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let handle = WorkerPool::new(
///     Arc::new(MemoryStore::new()),
///     Keyspace::root(),
///     HandlerRegistry::console(&JobClass::ALL),
///     WorkerOptions::default(),
/// )
/// .concurrency(4)
/// .spawn();
///
/// handle.shutdown().await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    template: Worker,
    concurrency: usize,
    name_prefix: String,
}

impl WorkerPool {
    /// Pool with a single worker.
    #[must_use]
    pub fn new(
        store: SharedStore,
        keys: Keyspace,
        registry: HandlerRegistry,
        options: WorkerOptions,
    ) -> Self {
        Self {
            template: Worker::new(String::new(), store, keys, registry, options),
            concurrency: 1,
            name_prefix: format!("worker-{}", std::process::id()),
        }
    }

    /// Number of worker tasks; at least one.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Prefix for worker names, which become `<prefix>-<n>`.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Spawn the workers and the lease reaper on the current runtime.
    #[must_use]
    pub fn spawn(self) -> WorkerPoolHandle {
        let shutdown = ShutdownSignal::new();
        let mut tasks = Vec::with_capacity(self.concurrency + 1);

        for n in 0..self.concurrency {
            let mut worker = self.template.clone();
            worker.name = format!("{}-{n}", self.name_prefix);
            let signal = shutdown.clone();
            tasks.push(tokio::spawn(async move { worker.run(signal).await }));
        }

        let reaper = Reaper {
            leases: self.template.leases.clone(),
            classes: self.template.registry.classes(),
            interval: self.template.options.reap_interval,
        };
        let signal = shutdown.clone();
        tasks.push(tokio::spawn(async move { reaper.run(signal).await }));

        info!(
            workers = self.concurrency,
            prefix = %self.name_prefix,
            "Worker pool started"
        );

        WorkerPoolHandle { shutdown, tasks }
    }
}

struct Reaper {
    leases: Leases,
    classes: Vec<JobClass>,
    interval: Duration,
}

impl Reaper {
    async fn run(self, shutdown: ShutdownSignal) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = shutdown.triggered() => break,
            }
            for &class in &self.classes {
                match self.leases.reap_expired(class).await {
                    Ok(count) => QueueObserver::log_reaped(class, count),
                    Err(err) => warn!(class = %class, error = %err, "Lease reaping failed"),
                }
            }
        }
        debug!("Lease reaper stopped");
    }
}

/// Running pool; dropping it leaves the tasks running.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Signal shared by every task in the pool.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Number of tasks, reaper included.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Ask every task to stop and wait for them.
    ///
    /// In-progress polls and handlers run to completion first.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}
