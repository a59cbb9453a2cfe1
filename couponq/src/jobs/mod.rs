//! Background job pipeline
//!
//! Producers append [`Job`] records to a per-class main queue. Workers pop
//! them, lease them, run the class handler and acknowledge. Failures land
//! in a per-class dead-letter queue, which the [`QueueMonitor`] can list,
//! requeue or purge.
//!
//! # Example
//!
//! ```rust
//! use couponq::jobs::testing::RecordingHandler;
//! use couponq::jobs::{HandlerRegistry, JobClass, JobProducer, Payload, Worker, WorkerOptions};
//! use couponq::keys::Keyspace;
//! use couponq::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> couponq::jobs::JobResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let recorder = RecordingHandler::new();
//! let registry = HandlerRegistry::new().register(JobClass::Email, recorder.clone());
//!
//! let producer = JobProducer::new(store.clone(), Keyspace::root(), &registry.classes());
//! producer.enqueue(JobClass::Email, Payload::new(), None).await?;
//!
//! let worker = Worker::new("docs", store, Keyspace::root(), registry, WorkerOptions::default());
//! worker.run_once().await?;
//! assert_eq!(recorder.len(), 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod handler;
mod job;
pub mod lease;
mod monitor;
pub mod observability;
pub mod payload;
mod producer;
mod shutdown;
pub mod testing;
mod worker;

pub use error::{JobError, JobResult};
pub use handler::{ConsoleHandler, HandlerRegistry, JobHandler};
pub use job::{Job, JobClass, JobId, Payload};
pub use monitor::{ClassStats, QueueMonitor, QueueStats};
pub use payload::{AffiliateNetwork, CashbackSyncJob, EmailJob, EmailKind, SmsJob, SmsKind, TypedPayload};
pub use producer::JobProducer;
pub use shutdown::ShutdownSignal;
pub use worker::{CycleReport, PollOutcome, Worker, WorkerOptions, WorkerPool, WorkerPoolHandle};
