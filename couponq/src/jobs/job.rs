//! Job record, identifiers and classes.

use super::{JobError, JobResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job payload.
pub type Payload = Map<String, Value>;

/// Class of work a job belongs to.
///
/// Each class has its own main queue, in-flight set and dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobClass {
    /// Transactional email.
    Email,
    /// SMS notification.
    Sms,
    /// Affiliate-network cashback sync.
    Cashback,
}

impl JobClass {
    /// Every class, in worker round-robin order.
    pub const ALL: [Self; 3] = [Self::Email, Self::Sms, Self::Cashback];

    /// Wire name, also used in keys and id prefixes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Cashback => "cashback",
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobClass {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| JobError::UnknownClass(s.to_string()))
    }
}

/// Unique identifier for a job.
///
/// Generated ids look like `email_1a2b3c4d5e6f`: the class name followed by
/// twelve lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id prefixed by the class name.
    #[must_use]
    pub fn generate(class: JobClass) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", class.as_str(), &hex[..12]))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A unit of deferred work.
///
/// Serialized as one JSON object per list entry. `error` and `failedAt`
/// are only present once the job has failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Job class.
    pub class: JobClass,
    /// Opaque payload handed to the handler.
    #[serde(default)]
    pub payload: Payload,
    /// Number of failed executions so far.
    #[serde(default)]
    pub attempts: u32,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Last failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job last failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job with zero attempts.
    #[must_use]
    pub fn new(id: JobId, class: JobClass, payload: Payload) -> Self {
        Self {
            id,
            class,
            payload,
            attempts: 0,
            created_at: Utc::now(),
            error: None,
            failed_at: None,
        }
    }

    /// Wrap an entry that could not be decoded so it can sit in the DLQ.
    ///
    /// Keeps the entry's own `id` when it has one.
    #[must_use]
    pub fn poison(class: JobClass, raw: &str, decode_error: &str) -> Self {
        let mut payload = Payload::new();
        payload.insert("raw".to_string(), Value::String(raw.to_string()));

        let id = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| value.get("id")?.as_str().map(JobId::from))
            .unwrap_or_else(|| JobId::generate(class));
        let mut job = Self::new(id, class, payload);
        job.record_failure(format!("decode error: {decode_error}"));
        job
    }

    /// Record a failed execution.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.error = Some(error.into());
        self.failed_at = Some(Utc::now());
    }

    /// Reset failure bookkeeping before returning the job to its queue.
    pub fn reset_for_retry(&mut self) {
        self.attempts = 0;
        self.error = None;
        self.failed_at = None;
    }

    /// Whether the job has used up `max_attempts`.
    #[must_use]
    pub const fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Serialize to a list entry.
    pub fn to_entry(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a list entry written by [`Job::to_entry`].
    pub fn from_entry(entry: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(entry)?)
    }

    /// Parse an entry read from `class`'s queues.
    ///
    /// Besides [`Job::to_entry`] records this accepts the flat records
    /// legacy producers push, such as
    /// `{"id","type","to","data","attempts","createdAt"}`: the class comes
    /// from the queue, every unrecognised field goes into the payload, and
    /// timestamps without an offset are read as UTC.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::ClassMismatch`] when the entry names another
    /// class, and a serialization or [`JobError::InvalidRecord`] error when
    /// it is not a job record.
    pub fn decode(class: JobClass, entry: &str) -> JobResult<Self> {
        let record: QueueEntry = serde_json::from_str(entry)?;
        if let Some(found) = record.class {
            if found != class {
                return Err(JobError::ClassMismatch {
                    expected: class,
                    found,
                });
            }
        }

        Ok(Self {
            id: record.id,
            class,
            payload: record.payload.unwrap_or(record.extra),
            attempts: record.attempts,
            created_at: parse_timestamp("createdAt", &record.created_at)?,
            error: record.error,
            failed_at: record
                .failed_at
                .as_deref()
                .map(|at| parse_timestamp("failedAt", at))
                .transpose()?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueEntry {
    id: JobId,
    #[serde(default)]
    class: Option<JobClass>,
    #[serde(default)]
    payload: Option<Payload>,
    #[serde(default)]
    attempts: u32,
    created_at: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    failed_at: Option<String>,
    #[serde(flatten)]
    extra: Payload,
}

/// RFC 3339, or an ISO 8601 local time taken as UTC.
fn parse_timestamp(field: &str, value: &str) -> JobResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|at| at.and_utc())
        })
        .map_err(|err| JobError::InvalidRecord(format!("{field} {value:?}: {err}")))
}
