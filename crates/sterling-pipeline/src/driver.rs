//! Outbox queue driver.
//!
//! The driver owns the delivery side of the outbox: one poll loop per
//! registered queue claims pending jobs and hands them to that queue's
//! [`QueueProcessor`]. Completion and failure are reported back to the
//! repository, which schedules backoff redelivery; the driver itself holds
//! no retry policy. A slow tick returns stale claims from crashed workers
//! to the pending state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sterling_core::defaults::{CLAIM_TIMEOUT_SECS, OUTBOX_POLL_INTERVAL_MS, RECLAIM_INTERVAL_MS};
use sterling_core::{
    new_v7, Error, OutboxJob, OutboxJobState, OutboxQueueStats, OutboxRepository, Result,
};

/// Handles jobs claimed from one queue.
///
/// `Ok` completes the job; `Err` fails it, which schedules a backoff
/// redelivery until the repository's attempt cap is reached.
#[async_trait]
pub trait QueueProcessor: Send + Sync {
    async fn process(&self, job: &OutboxJob) -> Result<()>;
}

/// Driver tuning knobs.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Sleep between drains of an idle queue, in milliseconds.
    pub poll_interval_ms: u64,
    /// Interval between stale-claim sweeps, in milliseconds.
    pub reclaim_interval_ms: u64,
    /// Age after which a processing claim is considered abandoned, in seconds.
    pub claim_timeout_secs: i64,
    /// When false, `start` returns a handle but no loops run.
    pub enabled: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: OUTBOX_POLL_INTERVAL_MS,
            reclaim_interval_ms: RECLAIM_INTERVAL_MS,
            claim_timeout_secs: CLAIM_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl DriverConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `STERLING_DRIVER_POLL_INTERVAL_MS`
    /// - `STERLING_DRIVER_RECLAIM_INTERVAL_MS`
    /// - `STERLING_DRIVER_CLAIM_TIMEOUT_SECS`
    /// - `STERLING_DRIVER_ENABLED` (`false`/`0` to disable)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_ms: std::env::var("STERLING_DRIVER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
            reclaim_interval_ms: std::env::var("STERLING_DRIVER_RECLAIM_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reclaim_interval_ms),
            claim_timeout_secs: std::env::var("STERLING_DRIVER_CLAIM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.claim_timeout_secs),
            enabled: std::env::var("STERLING_DRIVER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.enabled),
        }
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_reclaim_interval_ms(mut self, ms: u64) -> Self {
        self.reclaim_interval_ms = ms;
        self
    }

    pub fn with_claim_timeout_secs(mut self, secs: i64) -> Self {
        self.claim_timeout_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Events emitted by the driver, for tests and observability.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    DriverStarted,
    JobStarted {
        job_id: Uuid,
        queue: String,
    },
    JobCompleted {
        job_id: Uuid,
        queue: String,
        duration_ms: u64,
    },
    JobFailed {
        job_id: Uuid,
        queue: String,
        error: String,
    },
    DriverStopped,
}

/// Handle to a started driver.
pub struct DriverHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<DriverEvent>,
}

impl DriverHandle {
    /// Signal the driver to stop. Queue loops finish their current drain
    /// first; claims are never abandoned mid-flight.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("driver already stopped".to_string()))
    }

    /// Subscribe to driver events from this point on.
    pub fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_rx.resubscribe()
    }
}

struct Registration {
    processor: Arc<dyn QueueProcessor>,
    drain_gate: Arc<Mutex<()>>,
}

/// Polls the outbox and dispatches claimed jobs to registered processors.
pub struct OutboxDriver {
    outbox: Arc<dyn OutboxRepository>,
    processors: Arc<RwLock<HashMap<String, Registration>>>,
    config: DriverConfig,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl OutboxDriver {
    pub fn new(outbox: Arc<dyn OutboxRepository>, config: DriverConfig) -> Self {
        let (event_tx, _) = broadcast::channel(128);
        Self {
            outbox,
            processors: Arc::new(RwLock::new(HashMap::new())),
            config,
            event_tx,
        }
    }

    /// Register the processor for a queue. Registering the same queue twice
    /// replaces the previous processor.
    pub async fn register_processor(&self, queue: &str, processor: Arc<dyn QueueProcessor>) {
        let registration = Registration {
            processor,
            drain_gate: Arc::new(Mutex::new(())),
        };
        let mut map = self.processors.write().await;
        if map.insert(queue.to_string(), registration).is_some() {
            warn!(queue = %queue, "replaced existing queue processor");
        } else {
            info!(queue = %queue, "registered queue processor");
        }
    }

    /// Spawn the poll loops and return a handle for shutdown and events.
    ///
    /// Queues registered after `start` are not picked up; register
    /// everything first.
    pub fn start(self) -> DriverHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        tokio::spawn(self.run(shutdown_rx));
        DriverHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("outbox driver disabled, not starting");
            return;
        }

        let registrations: Vec<(String, Arc<dyn QueueProcessor>, Arc<Mutex<()>>)> = {
            let map = self.processors.read().await;
            map.iter()
                .map(|(queue, reg)| {
                    (
                        queue.clone(),
                        Arc::clone(&reg.processor),
                        Arc::clone(&reg.drain_gate),
                    )
                })
                .collect()
        };

        let _ = self.event_tx.send(DriverEvent::DriverStarted);
        info!(
            queues = registrations.len(),
            poll_interval_ms = self.config.poll_interval_ms,
            "outbox driver started"
        );

        let (stop_tx, _) = broadcast::channel::<()>(1);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut loops = Vec::new();
        for (queue, processor, drain_gate) in registrations {
            let driver = DriverRef {
                outbox: Arc::clone(&self.outbox),
                event_tx: self.event_tx.clone(),
            };
            loops.push(tokio::spawn(queue_loop(
                driver,
                queue,
                processor,
                drain_gate,
                poll_interval,
                stop_tx.subscribe(),
            )));
        }

        // The supervisor only runs the reclaim tick; the first tick fires
        // immediately, recovering claims orphaned by a previous crash.
        let mut reclaim =
            tokio::time::interval(Duration::from_millis(self.config.reclaim_interval_ms));
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = reclaim.tick() => {
                    match self.outbox.reclaim_stale(self.config.claim_timeout_secs).await {
                        Ok(0) => {}
                        Ok(n) => warn!(reclaimed = n, "returned stale outbox claims to pending"),
                        Err(e) => error!(error = %e, "stale-claim sweep failed"),
                    }
                }
            }
        }

        let _ = stop_tx.send(());
        for handle in loops {
            let _ = handle.await;
        }
        let _ = self.event_tx.send(DriverEvent::DriverStopped);
        info!("outbox driver stopped");
    }
}

/// One poll loop per queue. The drain gate keeps at most one drain of this
/// queue active per driver even if a tick were to overlap a slow drain.
async fn queue_loop(
    driver: DriverRef,
    queue: String,
    processor: Arc<dyn QueueProcessor>,
    drain_gate: Arc<Mutex<()>>,
    poll_interval: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    debug!(queue = %queue, "queue loop started");
    loop {
        if let Ok(_permit) = drain_gate.try_lock() {
            driver.drain(&queue, processor.as_ref()).await;
        }
        tokio::select! {
            _ = stop.recv() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!(queue = %queue, "queue loop stopped");
}

/// The clonable subset of driver state that queue loops need.
#[derive(Clone)]
struct DriverRef {
    outbox: Arc<dyn OutboxRepository>,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl DriverRef {
    /// Claim and process jobs until the queue has nothing claimable. A claim
    /// error ends this drain only; the next poll tick starts over.
    async fn drain(&self, queue: &str, processor: &dyn QueueProcessor) {
        loop {
            match self.outbox.claim(queue).await {
                Ok(Some(job)) => self.execute(processor, job).await,
                Ok(None) => break,
                Err(e) => {
                    error!(queue = %queue, error = %e, "outbox claim failed");
                    break;
                }
            }
        }
    }

    async fn execute(&self, processor: &dyn QueueProcessor, job: OutboxJob) {
        let started = Instant::now();
        let _ = self.event_tx.send(DriverEvent::JobStarted {
            job_id: job.id,
            queue: job.queue.clone(),
        });
        debug!(
            job_id = %job.id,
            queue = %job.queue,
            attempt = job.attempts,
            "processing outbox job"
        );

        match processor.process(&job).await {
            Ok(()) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                if let Err(e) = self.outbox.complete(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to mark outbox job completed");
                }
                info!(
                    job_id = %job.id,
                    queue = %job.queue,
                    duration_ms,
                    "outbox job completed"
                );
                let _ = self.event_tx.send(DriverEvent::JobCompleted {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    duration_ms,
                });
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempts,
                    error = %error,
                    "outbox job failed"
                );
                if let Err(e) = self.outbox.fail(job.id, &error).await {
                    error!(job_id = %job.id, error = %e, "failed to record outbox job failure");
                }
                let _ = self.event_tx.send(DriverEvent::JobFailed {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    error,
                });
            }
        }
    }
}

/// In-memory outbox for tests and configurations without a durable store.
///
/// `enqueue` executes the registered processor synchronously inline, so by
/// the time it returns the job has already completed or failed. Jobs are
/// kept in memory for `get` and `queue_stats`; nothing is redelivered.
pub struct InlineOutbox {
    processors: RwLock<HashMap<String, Arc<dyn QueueProcessor>>>,
    jobs: Mutex<HashMap<Uuid, OutboxJob>>,
}

impl InlineOutbox {
    pub fn new() -> Self {
        Self {
            processors: RwLock::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_processor(&self, queue: &str, processor: Arc<dyn QueueProcessor>) {
        self.processors
            .write()
            .await
            .insert(queue.to_string(), processor);
    }

    /// No-op; inline jobs run at enqueue time.
    pub fn start(&self) {}

    /// No-op; there are no loops to stop.
    pub fn shutdown(&self) {}

    async fn run_inline(
        &self,
        queue: &str,
        payload: JsonValue,
        dedupe_key: Option<&str>,
    ) -> Result<Uuid> {
        let processor = self.processors.read().await.get(queue).cloned();
        let Some(processor) = processor else {
            return Err(Error::Job(format!(
                "no processor registered for queue {queue}"
            )));
        };

        let now = Utc::now();
        let mut job = OutboxJob {
            id: new_v7(),
            queue: queue.to_string(),
            payload,
            state: OutboxJobState::Processing,
            attempts: 1,
            available_at: now,
            dedupe_key: dedupe_key.map(str::to_string),
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let outcome = processor.process(&job).await;
        match &outcome {
            Ok(()) => job.state = OutboxJobState::Completed,
            Err(e) => {
                job.state = OutboxJobState::Failed;
                job.last_error = Some(e.to_string());
            }
        }
        job.updated_at = Utc::now();

        let id = job.id;
        self.jobs.lock().await.insert(id, job);
        outcome.map(|_| id)
    }
}

impl Default for InlineOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxRepository for InlineOutbox {
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<Uuid> {
        self.run_inline(queue, payload, None).await
    }

    async fn enqueue_deduplicated(
        &self,
        queue: &str,
        payload: JsonValue,
        dedupe_key: &str,
    ) -> Result<Option<Uuid>> {
        // Inline execution finishes before enqueue returns, so no same-key
        // job can ever be in flight; the insert always goes through.
        self.run_inline(queue, payload, Some(dedupe_key))
            .await
            .map(Some)
    }

    async fn claim(&self, _queue: &str) -> Result<Option<OutboxJob>> {
        // Every job has already run by the time it is stored.
        Ok(None)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.state = OutboxJobState::Completed;
            job.last_error = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        job.state = OutboxJobState::Failed;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reclaim_stale(&self, _older_than_secs: i64) -> Result<u64> {
        Ok(0)
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.queue == queue && j.state == OutboxJobState::Pending)
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<Vec<OutboxQueueStats>> {
        let jobs = self.jobs.lock().await;
        let mut by_queue: BTreeMap<String, OutboxQueueStats> = BTreeMap::new();
        for job in jobs.values() {
            let stats = by_queue
                .entry(job.queue.clone())
                .or_insert_with(|| OutboxQueueStats {
                    queue: job.queue.clone(),
                    pending: 0,
                    processing: 0,
                    completed: 0,
                    failed: 0,
                });
            match job.state {
                OutboxJobState::Pending => stats.pending += 1,
                OutboxJobState::Processing => stats.processing += 1,
                OutboxJobState::Completed => stats.completed += 1,
                OutboxJobState::Failed => stats.failed += 1,
            }
        }
        Ok(by_queue.into_values().collect())
    }

    async fn get(&self, id: Uuid) -> Result<OutboxJob> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }
}
