//! couponq: Redis-backed job dispatch and coordination primitives
//!
//! Producers enqueue typed jobs (email, SMS, affiliate cashback sync) onto
//! per-class queues; worker pools consume them, dead-letter failures and
//! recover jobs from crashed workers through leases. The same store
//! connection also backs:
//!
//! - a TTL [`cache`]
//! - a fixed-window [`rate_limit`]er
//! - owner-token [`lock`]s
//! - click and leaderboard [`ranking`]s
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use couponq::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CouponqConfig::load()?;
//!     couponq::observability::init(&config.logging)?;
//!
//!     let dispatch = Dispatch::connect(config).await?;
//!     let registry = HandlerRegistry::console(&dispatch.config().queues.classes);
//!
//!     dispatch
//!         .producer_for(&registry)
//!         .enqueue_payload(&EmailJob::new(EmailKind::Welcome, "new@user.com"), None)
//!         .await?;
//!
//!     let pool = dispatch.worker_pool(registry).spawn();
//!     tokio::signal::ctrl_c().await?;
//!     pool.shutdown().await;
//!
//!     dispatch.close();
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod lock;
pub mod observability;
pub mod ranking;
pub mod rate_limit;
pub mod state;
pub mod store;

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! ```rust
    //! use couponq::prelude::*;
    //! ```

    pub use crate::cache::Cache;
    pub use crate::config::CouponqConfig;
    pub use crate::error::CouponqError;
    pub use crate::jobs::{
        CashbackSyncJob, EmailJob, EmailKind, HandlerRegistry, Job, JobClass, JobError,
        JobHandler, JobId, JobProducer, JobResult, Payload, QueueMonitor, SmsJob, SmsKind,
        TypedPayload, Worker, WorkerPool,
    };
    pub use crate::keys::{rk, Keyspace};
    pub use crate::lock::{LockGuard, Locks};
    pub use crate::ranking::Rankings;
    pub use crate::rate_limit::{RateLimitDecision, RateLimiter};
    pub use crate::state::Dispatch;
    pub use crate::store::{MemoryStore, RedisStore, SharedStore, Store, StoreError};

    pub use serde_json::json;
}
