//! Integration tests for the outbox driver.
//!
//! This test suite validates:
//! - Poll loops claim pending jobs oldest-first and run them to completion
//! - Lifecycle events are broadcast for starts, completions and failures
//! - A failed delivery goes back to pending with backoff and a recorded error
//! - Each queue is routed to its registered processor only
//! - A disabled driver never claims work
//! - Jobs on queues without a processor are left untouched
//! - The stale-claim sweep returns orphaned claims for redelivery
//!
//! The driver runs against the in-memory outbox from `support`, which
//! mirrors the Postgres claim, backoff and reclaim rules.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use sterling_core::{Error, OutboxJob, OutboxJobState, OutboxRepository, Result};
use sterling_pipeline::{DriverConfig, DriverEvent, OutboxDriver, QueueProcessor};

use support::{wait_for, TestStores};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Driver tuning for tests: fast polls, an immediate reclaim tick, and a
/// claim timeout long enough that only backdated claims look stale.
fn fast_config() -> DriverConfig {
    DriverConfig::default()
        .with_poll_interval_ms(10)
        .with_reclaim_interval_ms(30)
        .with_claim_timeout_secs(60)
}

/// Wait until an outbox job reaches the given state.
async fn wait_for_state(stores: &TestStores, id: Uuid, state: OutboxJobState) {
    let outbox = &stores.outbox;
    wait_for("outbox job state", || async move {
        outbox.get(id).await.unwrap().state == state
    })
    .await;
}

/// Queue processor that records every job it runs.
struct TrackingProcessor {
    seen: Arc<Mutex<Vec<Uuid>>>,
    fail_with: Option<String>,
}

impl TrackingProcessor {
    fn new() -> (Arc<Self>, Arc<Mutex<Vec<Uuid>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                seen: seen.clone(),
                fail_with: None,
            }),
            seen,
        )
    }

    fn failing(error: &str) -> (Arc<Self>, Arc<Mutex<Vec<Uuid>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                seen: seen.clone(),
                fail_with: Some(error.to_string()),
            }),
            seen,
        )
    }
}

#[async_trait::async_trait]
impl QueueProcessor for TrackingProcessor {
    async fn process(&self, job: &OutboxJob) -> Result<()> {
        self.seen.lock().await.push(job.id);
        match &self.fail_with {
            Some(error) => Err(Error::Job(error.clone())),
            None => Ok(()),
        }
    }
}

// ============================================================================
// INTEGRATION TESTS - Delivery
// ============================================================================

#[tokio::test]
async fn test_driver_processes_enqueued_jobs_in_order() {
    let stores = TestStores::new();
    let (processor, seen) = TrackingProcessor::new();

    let mut expected = Vec::new();
    for n in 0..3 {
        let id = stores
            .outbox
            .enqueue("ingest", json!({ "n": n }))
            .await
            .unwrap();
        expected.push(id);
    }

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config());
    driver.register_processor("ingest", processor).await;
    let handle = driver.start();

    for id in &expected {
        wait_for_state(&stores, *id, OutboxJobState::Completed).await;
    }

    assert_eq!(*seen.lock().await, expected, "jobs should run oldest-first");
    for id in &expected {
        let job = stores.outbox.get(*id).await.unwrap();
        assert_eq!(job.attempts, 1);
        assert!(job.last_error.is_none());
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queues_route_to_their_own_processors() {
    let stores = TestStores::new();
    let (alpha, alpha_seen) = TrackingProcessor::new();
    let (beta, beta_seen) = TrackingProcessor::new();

    let alpha_job = stores.outbox.enqueue("alpha", json!({})).await.unwrap();
    let beta_job = stores.outbox.enqueue("beta", json!({})).await.unwrap();

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config());
    driver.register_processor("alpha", alpha).await;
    driver.register_processor("beta", beta).await;
    let handle = driver.start();

    wait_for_state(&stores, alpha_job, OutboxJobState::Completed).await;
    wait_for_state(&stores, beta_job, OutboxJobState::Completed).await;

    assert_eq!(*alpha_seen.lock().await, vec![alpha_job]);
    assert_eq!(*beta_seen.lock().await, vec![beta_job]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_queue_is_left_pending() {
    let stores = TestStores::new();
    let (processor, _seen) = TrackingProcessor::new();

    let known = stores.outbox.enqueue("known", json!({})).await.unwrap();
    let mystery = stores.outbox.enqueue("mystery", json!({})).await.unwrap();

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config());
    driver.register_processor("known", processor).await;
    let handle = driver.start();

    // The known queue drains first, which proves the driver is live before
    // we check that the unregistered queue was not touched.
    wait_for_state(&stores, known, OutboxJobState::Completed).await;

    let job = stores.outbox.get(mystery).await.unwrap();
    assert_eq!(job.state, OutboxJobState::Pending);
    assert_eq!(job.attempts, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_driver_runs_nothing() {
    let stores = TestStores::new();
    let (processor, seen) = TrackingProcessor::new();

    let job_id = stores.outbox.enqueue("idle", json!({})).await.unwrap();

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config().with_enabled(false));
    driver.register_processor("idle", processor).await;
    let handle = driver.start();

    sleep(Duration::from_millis(200)).await;

    let job = stores.outbox.get(job_id).await.unwrap();
    assert_eq!(job.state, OutboxJobState::Pending);
    assert_eq!(job.attempts, 0);
    assert!(seen.lock().await.is_empty());

    // run() returns immediately when disabled, so the shutdown channel is
    // already closed.
    assert!(handle.shutdown().await.is_err());
}

// ============================================================================
// INTEGRATION TESTS - Events
// ============================================================================

#[tokio::test]
async fn test_driver_broadcasts_lifecycle_events() {
    let stores = TestStores::new();
    let (processor, _seen) = TrackingProcessor::new();

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config());
    driver.register_processor("exports", processor).await;
    let handle = driver.start();
    let mut events = handle.events();

    let job_id = stores.outbox.enqueue("exports", json!({})).await.unwrap();

    // Collect until our job completes. The subscription predates anything
    // the spawned run loop sends, so DriverStarted is buffered for us.
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for JobCompleted");
        }
        tokio::select! {
            event = events.recv() => {
                if let Ok(event) = event {
                    let done = matches!(
                        &event,
                        DriverEvent::JobCompleted { job_id: id, .. } if *id == job_id
                    );
                    received.push(event);
                    if done {
                        break;
                    }
                }
            }
            _ = sleep(Duration::from_millis(50)) => {}
        }
    }

    assert!(
        received
            .iter()
            .any(|e| matches!(e, DriverEvent::DriverStarted)),
        "should receive DriverStarted"
    );
    assert!(
        received
            .iter()
            .any(|e| matches!(e, DriverEvent::JobStarted { job_id: id, .. } if *id == job_id)),
        "should receive JobStarted for the enqueued job"
    );

    handle.shutdown().await.unwrap();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(DriverEvent::DriverStopped)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("event channel closed before DriverStopped: {e}"),
            Err(_) => panic!("timed out waiting for DriverStopped"),
        }
    }
}

// ============================================================================
// INTEGRATION TESTS - Failure and recovery
// ============================================================================

#[tokio::test]
async fn test_failed_job_returns_to_pending_with_backoff() {
    let stores = TestStores::new();
    let (processor, seen) = TrackingProcessor::failing("downstream unavailable");

    let job_id = stores.outbox.enqueue("flaky", json!({})).await.unwrap();

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config());
    driver.register_processor("flaky", processor).await;
    let handle = driver.start();
    let mut events = handle.events();

    // The failure is recorded before the JobFailed event is sent, so the
    // store is settled once the event arrives.
    let error = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(DriverEvent::JobFailed { job_id: id, error, .. })) if id == job_id => {
                break error;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("event channel closed: {e}"),
            Err(_) => panic!("timed out waiting for JobFailed"),
        }
    };
    assert!(error.contains("downstream unavailable"));

    let job = stores.outbox.get(job_id).await.unwrap();
    assert_eq!(
        job.state,
        OutboxJobState::Pending,
        "failure short of the attempt cap goes back to pending"
    );
    assert_eq!(job.attempts, 1);
    assert!(
        job.available_at > Utc::now(),
        "backoff pushes availability into the future"
    );
    assert_eq!(
        job.last_error.as_deref(),
        Some("Job error: downstream unavailable")
    );
    assert_eq!(
        seen.lock().await.len(),
        1,
        "backoff keeps the job out of the next drains"
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stale_claims_are_reclaimed_and_redelivered() {
    let stores = TestStores::new();
    let (processor, seen) = TrackingProcessor::new();

    // A previous process claimed the job and died: the claim is an hour
    // old, well past the 60s timeout.
    let job_id = stores.outbox.enqueue("sweeps", json!({})).await.unwrap();
    let claimed = stores.outbox.claim("sweeps").await.unwrap().unwrap();
    assert_eq!(claimed.id, job_id);
    stores.outbox.backdate_claim(job_id, 3600);

    let driver = OutboxDriver::new(stores.outbox.clone(), fast_config());
    driver.register_processor("sweeps", processor).await;
    let handle = driver.start();

    // The first reclaim tick fires immediately and returns the claim to
    // pending; the queue loop then delivers it.
    wait_for_state(&stores, job_id, OutboxJobState::Completed).await;

    let job = stores.outbox.get(job_id).await.unwrap();
    assert_eq!(job.attempts, 2, "the redelivery is a second claim");
    assert_eq!(*seen.lock().await, vec![job_id]);

    handle.shutdown().await.unwrap();
}
