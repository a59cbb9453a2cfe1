//! Per-class job handlers and the registry that maps classes to them.

use super::payload::EmailKind;
use super::{Job, JobClass, JobError, JobResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Executes jobs of one class.
///
/// Delivery is at-least-once: a worker crash after the handler ran but
/// before acknowledgment redelivers the job, so handlers must tolerate
/// seeing the same job twice.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use couponq::jobs::{Job, JobHandler, JobResult};
///
/// struct Noop;
///
/// #[async_trait]
/// impl JobHandler for Noop {
///     async fn handle(&self, _job: &Job) -> JobResult<()> {
///         Ok(())
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job. Any error sends it to the dead-letter queue.
    ///
    /// # Errors
    ///
    /// Returns `JobError` if the job could not be completed.
    async fn handle(&self, job: &Job) -> JobResult<()>;
}

/// Registered handlers, one per class.
///
/// Built once at startup. The producer rejects classes that are not in
/// here, and the worker only polls the queues of registered classes.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<JobClass, Arc<dyn JobHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("classes", &self.classes())
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a [`ConsoleHandler`] for each class.
    #[must_use]
    pub fn console(classes: &[JobClass]) -> Self {
        classes.iter().fold(Self::new(), |registry, &class| {
            registry.register(class, ConsoleHandler)
        })
    }

    /// Register `handler` for `class`, replacing any previous one.
    #[must_use]
    pub fn register<H: JobHandler + 'static>(self, class: JobClass, handler: H) -> Self {
        self.register_arc(class, Arc::new(handler))
    }

    /// Register a shared handler for `class`.
    #[must_use]
    pub fn register_arc(mut self, class: JobClass, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(class, handler);
        self
    }

    /// Handler for `class`.
    #[must_use]
    pub fn get(&self, class: JobClass) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&class)
    }

    /// Whether `class` has a handler.
    #[must_use]
    pub fn contains(&self, class: JobClass) -> bool {
        self.handlers.contains_key(&class)
    }

    /// Registered classes in round-robin order.
    #[must_use]
    pub fn classes(&self) -> Vec<JobClass> {
        self.handlers.keys().copied().collect()
    }

    /// Fail unless `class` is registered.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnregisteredClass`].
    pub fn ensure(&self, class: JobClass) -> JobResult<()> {
        if self.contains(class) {
            Ok(())
        } else {
            Err(JobError::UnregisteredClass(class))
        }
    }
}

/// Development handler that logs each job instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleHandler;

fn payload_str<'a>(job: &'a Job, field: &str) -> &'a str {
    job.payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("-")
}

fn email_subject(kind: &str) -> &'static str {
    serde_json::from_value::<EmailKind>(serde_json::Value::String(kind.to_string()))
        .map_or("Notification", EmailKind::subject)
}

#[async_trait]
impl JobHandler for ConsoleHandler {
    async fn handle(&self, job: &Job) -> JobResult<()> {
        match job.class {
            JobClass::Email => {
                let kind = payload_str(job, "type");
                info!(
                    job_id = %job.id,
                    to = payload_str(job, "to"),
                    subject = email_subject(kind),
                    kind,
                    "Email delivered to console"
                );
            }
            JobClass::Sms => {
                info!(
                    job_id = %job.id,
                    mobile = payload_str(job, "mobile"),
                    kind = payload_str(job, "type"),
                    "SMS delivered to console"
                );
            }
            JobClass::Cashback => {
                info!(
                    job_id = %job.id,
                    network = payload_str(job, "network"),
                    "Cashback sync logged to console"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Payload;

    #[test]
    fn test_registry_classes_are_ordered() {
        let registry = HandlerRegistry::new()
            .register(JobClass::Cashback, ConsoleHandler)
            .register(JobClass::Email, ConsoleHandler);
        assert_eq!(registry.classes(), vec![JobClass::Email, JobClass::Cashback]);
        assert!(registry.ensure(JobClass::Email).is_ok());
        assert!(matches!(
            registry.ensure(JobClass::Sms),
            Err(JobError::UnregisteredClass(JobClass::Sms))
        ));
    }

    #[test]
    fn test_console_registry_covers_all_classes() {
        let registry = HandlerRegistry::console(&JobClass::ALL);
        assert_eq!(registry.classes(), JobClass::ALL.to_vec());
    }

    #[test]
    fn test_email_subject_fallback() {
        assert_eq!(email_subject("cashback_confirmed"), "Cashback Credited to Your Wallet");
        assert_eq!(email_subject("newsletter"), "Notification");
    }

    #[tokio::test]
    async fn test_mock_handler_is_dispatched() {
        let mut mock = MockJobHandler::new();
        mock.expect_handle()
            .times(1)
            .returning(|_| Err(JobError::from("provider down")));

        let registry = HandlerRegistry::new().register(JobClass::Sms, mock);
        let job = Job::new("sms_1".into(), JobClass::Sms, Payload::new());
        let handler = registry.get(JobClass::Sms).unwrap();
        assert!(handler.handle(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_console_handler_accepts_any_payload() {
        let job = Job::new("email_1".into(), JobClass::Email, Payload::new());
        assert!(ConsoleHandler.handle(&job).await.is_ok());
    }
}
