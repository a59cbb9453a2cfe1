//! Structured logging around job execution.

use super::{Job, JobClass, JobId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Job execution context for logging.
#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionContext {
    /// Job ID.
    pub job_id: JobId,
    /// Job class.
    pub class: JobClass,
    /// Worker that picked the job up.
    pub worker: String,
    /// When the job started executing.
    pub started_at: DateTime<Utc>,
    /// Failed attempts before this one.
    pub attempt: u32,
    /// Attempts after which a failure is reported as exhausted.
    pub max_attempts: u32,
}

impl JobExecutionContext {
    /// Create a context for `job` about to run on `worker`.
    #[must_use]
    pub fn new(job: &Job, worker: &str, max_attempts: u32) -> Self {
        Self {
            job_id: job.id.clone(),
            class: job.class,
            worker: worker.to_string(),
            started_at: Utc::now(),
            attempt: job.attempts,
            max_attempts,
        }
    }

    /// Milliseconds since the job started.
    #[must_use]
    pub fn execution_duration_ms(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0)
            .try_into()
            .unwrap_or(0)
    }

    /// Log job start.
    pub fn log_start(&self) {
        debug!(
            job_id = %self.job_id,
            class = %self.class,
            worker = %self.worker,
            attempt = self.attempt,
            "Job execution started"
        );
    }

    /// Log job completion.
    pub fn log_completion(&self) {
        info!(
            job_id = %self.job_id,
            class = %self.class,
            worker = %self.worker,
            duration_ms = self.execution_duration_ms(),
            "Job completed successfully"
        );
    }

    /// Log a failure that sent the job to the dead-letter queue.
    ///
    /// `attempts` is the count after this failure was recorded.
    pub fn log_failure(&self, attempts: u32, error: &str) {
        let duration_ms = self.execution_duration_ms();
        if attempts >= self.max_attempts {
            warn!(
                job_id = %self.job_id,
                class = %self.class,
                worker = %self.worker,
                duration_ms,
                attempts,
                max_attempts = self.max_attempts,
                error,
                "Job exhausted its attempts; kept in dead-letter queue"
            );
        } else {
            error!(
                job_id = %self.job_id,
                class = %self.class,
                worker = %self.worker,
                duration_ms,
                attempts,
                error,
                "Job execution failed; moved to dead-letter queue"
            );
        }
    }
}

/// Queue-level log events that are not tied to one execution.
pub struct QueueObserver;

impl QueueObserver {
    /// Log job enqueued.
    pub fn log_enqueued(job_id: &JobId, class: JobClass, queue_len: u64) {
        debug!(job_id = %job_id, class = %class, queue_len, "Job enqueued");
    }

    /// Log a poison pill moved to the dead-letter queue.
    pub fn log_poison(class: JobClass, error: &str) {
        warn!(class = %class, error, "Undecodable queue entry moved to dead-letter queue");
    }

    /// Log expired leases returned to the main queue.
    pub fn log_reaped(class: JobClass, count: u64) {
        if count > 0 {
            warn!(class = %class, count, "Requeued jobs with expired leases");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Payload;

    #[test]
    fn test_context_captures_job() {
        let mut job = Job::new("sms_000000000001".into(), JobClass::Sms, Payload::new());
        job.attempts = 2;
        let ctx = JobExecutionContext::new(&job, "worker-0", 3);
        assert_eq!(ctx.job_id.as_str(), "sms_000000000001");
        assert_eq!(ctx.class, JobClass::Sms);
        assert_eq!(ctx.attempt, 2);
        assert_eq!(ctx.worker, "worker-0");
    }

    #[test]
    fn test_duration_is_non_negative() {
        let job = Job::new("email_1".into(), JobClass::Email, Payload::new());
        let ctx = JobExecutionContext::new(&job, "w", 3);
        assert!(ctx.execution_duration_ms() < 60_000);
        ctx.log_start();
        ctx.log_completion();
        ctx.log_failure(3, "boom");
    }
}
