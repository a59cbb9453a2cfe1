//! End-to-end behavior of the job pipeline and primitives against the
//! in-memory store.

use couponq::jobs::testing::{FailingHandler, RecordingHandler};
use couponq::jobs::{
    ClassStats, HandlerRegistry, Job, JobClass, JobId, Payload, PollOutcome, Worker,
    WorkerOptions,
};
use couponq::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn options() -> WorkerOptions {
    WorkerOptions {
        poll_timeout: Duration::from_millis(50),
        retry_delay: Duration::from_millis(10),
        handler_timeout: Duration::from_secs(5),
        lease_ttl: Duration::from_secs(30),
        reap_interval: Duration::from_secs(1),
        max_attempts: 3,
    }
}

struct Harness {
    store: MemoryStore,
    dispatch: Dispatch,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryStore::new();
        let dispatch = Dispatch::with_store(CouponqConfig::default(), Arc::new(store.clone()));
        Self { store, dispatch }
    }

    fn worker(&self, registry: HandlerRegistry) -> Worker {
        Worker::new(
            "it-0",
            self.dispatch.store(),
            self.dispatch.keys().clone(),
            registry,
            options(),
        )
    }

    async fn stats(&self, class: JobClass) -> ClassStats {
        self.dispatch.monitor().class_stats(class).await.unwrap()
    }

    async fn enqueue(&self, class: JobClass, payload: serde_json::Value) -> JobId {
        let serde_json::Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        self.dispatch
            .producer()
            .enqueue(class, map, None)
            .await
            .unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn enqueue_increments_only_pending() {
    let h = Harness::new();
    let before = h.stats(JobClass::Email).await;

    h.enqueue(JobClass::Email, json!({"to": "a@b.com"})).await;

    let after = h.stats(JobClass::Email).await;
    assert_eq!(after.pending, before.pending + 1);
    assert_eq!(after.processing, before.processing);
    assert_eq!(after.dead_letter, before.dead_letter);
}

#[tokio::test(start_paused = true)]
async fn successful_cycle_restores_counters() {
    let h = Harness::new();
    let before = h.stats(JobClass::Sms).await;
    h.enqueue(JobClass::Sms, json!({"mobile": "+910000000000"})).await;

    let recorder = RecordingHandler::new();
    let worker = h.worker(HandlerRegistry::new().register(JobClass::Sms, recorder.clone()));
    let report = worker.run_once().await.unwrap();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(recorder.len(), 1);
    assert_eq!(h.stats(JobClass::Sms).await, before);
}

#[tokio::test(start_paused = true)]
async fn failing_cycles_dead_letter_each_job_once() {
    let h = Harness::new();
    let worker = h.worker(HandlerRegistry::new().register(JobClass::Email, FailingHandler::default()));

    h.enqueue(JobClass::Email, json!({})).await;
    worker.run_once().await.unwrap();

    assert_eq!(h.stats(JobClass::Email).await.dead_letter, 1);
    let dead = h
        .dispatch
        .monitor()
        .list_dead_letter(JobClass::Email, 0, 10)
        .await
        .unwrap();
    assert_eq!(dead[0].attempts, 1);
    assert!(dead[0].error.is_some());
    assert!(dead[0].failed_at.is_some());

    for _ in 0..4 {
        h.enqueue(JobClass::Email, json!({})).await;
        worker.run_once().await.unwrap();
    }
    let stats = h.stats(JobClass::Email).await;
    assert_eq!(stats.dead_letter, 5);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
}

#[tokio::test(start_paused = true)]
async fn requeue_resets_failure_history() {
    let h = Harness::new();
    let worker = h.worker(HandlerRegistry::new().register(JobClass::Cashback, FailingHandler::default()));
    let id = h.enqueue(JobClass::Cashback, json!({"network": "admitad"})).await;
    worker.run_once().await.unwrap();

    let monitor = h.dispatch.monitor();
    let before = h.stats(JobClass::Cashback).await;
    assert!(monitor.requeue_dead_letter(JobClass::Cashback, 0).await.unwrap());

    let after = h.stats(JobClass::Cashback).await;
    assert_eq!(after.dead_letter, before.dead_letter - 1);
    assert_eq!(after.pending, before.pending + 1);

    let raw = h.store.lindex("queue:cashback", -1).await.unwrap().unwrap();
    let job = Job::from_entry(&raw).unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 0);
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(value.get("error").is_none());
    assert!(value.get("failedAt").is_none());
}

#[tokio::test(start_paused = true)]
async fn purge_returns_prior_length() {
    let h = Harness::new();
    let worker = h.worker(HandlerRegistry::new().register(JobClass::Sms, FailingHandler::default()));
    for _ in 0..3 {
        h.enqueue(JobClass::Sms, json!({})).await;
        worker.run_once().await.unwrap();
    }

    assert_eq!(h.dispatch.monitor().purge_dead_letter(JobClass::Sms).await.unwrap(), 3);
    assert_eq!(h.stats(JobClass::Sms).await.dead_letter, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_allows_exactly_limit_calls() {
    let h = Harness::new();
    let limiter = h.dispatch.rate_limiter();
    let window = Duration::from_secs(60);

    let mut remaining = Vec::new();
    for _ in 0..5 {
        let decision = limiter.check("user:42", 5, window).await.unwrap();
        assert!(decision.allowed);
        remaining.push(decision.remaining);
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
    assert!(!limiter.check("user:42", 5, window).await.unwrap().allowed);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_ttl_never_grows_within_window() {
    let h = Harness::new();
    let limiter = h.dispatch.rate_limiter();
    let window = Duration::from_secs(60);

    let initial = limiter.check("ip:1", 100, window).await.unwrap().ttl_secs;
    assert_eq!(initial, 60);
    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(limiter.check("ip:1", 100, window).await.unwrap().ttl_secs <= initial);
    }
}

#[tokio::test(start_paused = true)]
async fn lock_is_exclusive_until_ttl() {
    let h = Harness::new();
    let locks = h.dispatch.locks();
    let ttl = Duration::from_secs(2);

    let first = locks.acquire("x", ttl).await.unwrap();
    assert!(first.is_some());
    assert!(locks.acquire("x", ttl).await.unwrap().is_none());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(locks.acquire("x", ttl).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn cache_returns_value_until_ttl() {
    let h = Harness::new();
    let cache = h.dispatch.cache();

    cache.set("k", &json!({"a": 1}), Duration::from_secs(5)).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn end_to_end_email() {
    let h = Harness::new();
    let id = h.enqueue(JobClass::Email, json!({"to": "a@b.com"})).await;

    let (prefix, hex) = id.as_str().split_once('_').unwrap();
    assert_eq!(prefix, "email");
    assert_eq!(hex.len(), 12);
    assert!(hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));

    assert_eq!(h.stats(JobClass::Email).await.pending, 1);

    let recorder = RecordingHandler::new();
    let worker = h.worker(HandlerRegistry::new().register(JobClass::Email, recorder.clone()));
    worker.run_once().await.unwrap();

    assert_eq!(h.stats(JobClass::Email).await.pending, 0);
    assert_eq!(recorder.jobs()[0].payload["to"], "a@b.com");
}

#[tokio::test(start_paused = true)]
async fn poison_pill_is_isolated() {
    let h = Harness::new();
    h.store.rpush("queue:sms", "\u{0}garbage").await.unwrap();
    let recorder = RecordingHandler::new();
    let worker = h.worker(HandlerRegistry::new().register(JobClass::Sms, recorder.clone()));

    let report = worker.run_once().await.unwrap();
    assert!(matches!(report.outcome(JobClass::Sms), Some(PollOutcome::Poisoned(_))));
    assert!(recorder.is_empty());

    let dead = h
        .dispatch
        .monitor()
        .list_dead_letter(JobClass::Sms, 0, 1)
        .await
        .unwrap();
    assert_eq!(dead[0].payload["raw"], "\u{0}garbage");
    assert!(dead[0].error.as_deref().unwrap().starts_with("decode error"));
}

#[tokio::test(start_paused = true)]
async fn round_robin_visits_every_class() {
    let h = Harness::new();
    for class in JobClass::ALL {
        h.enqueue(class, json!({})).await;
    }
    let recorder = RecordingHandler::new();
    let registry = JobClass::ALL
        .into_iter()
        .fold(HandlerRegistry::new(), |r, class| r.register(class, recorder.clone()));

    let report = h.worker(registry).run_once().await.unwrap();
    assert_eq!(report.succeeded(), 3);
    let classes: Vec<_> = recorder.jobs().iter().map(|j| j.class).collect();
    assert_eq!(classes, JobClass::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn unregistered_class_rejected_before_store() {
    let h = Harness::new();
    let registry = HandlerRegistry::new().register(JobClass::Email, RecordingHandler::new());

    let result = h
        .dispatch
        .producer_for(&registry)
        .enqueue(JobClass::Cashback, Payload::new(), None)
        .await;
    assert!(matches!(result, Err(JobError::UnregisteredClass(JobClass::Cashback))));
    assert_eq!(h.store.key_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn crashed_worker_lease_is_reaped() {
    let h = Harness::new();
    let id = h.enqueue(JobClass::Email, json!({})).await;

    // Simulate a worker that popped and leased the job, then died.
    let raw = h.store.blpop("queue:email", Duration::ZERO).await.unwrap().unwrap();
    let leases = couponq::jobs::lease::Leases::new(
        h.dispatch.store(),
        h.dispatch.keys().clone(),
        Duration::ZERO,
    );
    leases.acquire(JobClass::Email, "dead-worker", &id, &raw).await.unwrap();
    assert_eq!(h.stats(JobClass::Email).await.processing, 1);

    let reaped = leases.reap_before(JobClass::Email, f64::MAX).await.unwrap();
    assert_eq!(reaped, 1);

    let stats = h.stats(JobClass::Email).await;
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.pending, 1);
    let requeued = Job::from_entry(&h.store.lindex("queue:email", 0).await.unwrap().unwrap()).unwrap();
    assert_eq!(requeued.id, id);
    assert_eq!(requeued.attempts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_drains_queue_exactly_once() {
    let h = Harness::new();
    let mut expected = HashSet::new();
    for _ in 0..40 {
        expected.insert(h.enqueue(JobClass::Email, json!({})).await);
    }

    let recorder = RecordingHandler::new();
    let registry = HandlerRegistry::new().register(JobClass::Email, recorder.clone());
    let pool = couponq::jobs::WorkerPool::new(
        h.dispatch.store(),
        h.dispatch.keys().clone(),
        registry,
        options(),
    )
    .concurrency(4)
    .spawn();

    tokio::time::timeout(Duration::from_secs(10), async {
        while recorder.len() < expected.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue drained");
    pool.shutdown().await;

    let seen: Vec<JobId> = recorder.ids();
    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
    assert_eq!(h.stats(JobClass::Email).await, ClassStats::default());
}
