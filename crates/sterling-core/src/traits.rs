//! Repository and backend traits.
//!
//! Persistence is always reached through these traits. Production code wires
//! in the Postgres implementations from `sterling-db`; tests substitute
//! in-memory fakes. Nothing here is a global: every consumer receives its
//! handles explicitly at construction.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::array_update::UpdatePlan;
use crate::error::Result;
use crate::models::{
    Account, DeadLetterEntry, DeadLetterReason, DocumentInsight, DocumentKind, InsightMetrics,
    Month, OutboxJob, OutboxQueueStats, OverrideScope, PipelineJob, PipelineJobStatus, StepName,
    StepStatus, Transaction, UserAnalyticsSnapshot, UserOverride,
};

// ============================================================================
// Requests
// ============================================================================

/// Parameters for creating a pipeline job at enqueue time.
#[derive(Debug, Clone)]
pub struct NewPipelineJob {
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub original_name: String,
    pub collection_id: Option<Uuid>,
    pub display_name: Option<String>,
    pub storage_key: String,
    /// Defaults to [`crate::defaults::PIPELINE_MAX_ATTEMPTS`] when `None`.
    pub max_attempts: Option<i32>,
}

/// A step transition. Timestamps are stamped by the repository: `started_at`
/// when entering `Running`, `ended_at` when entering `Completed` or `Failed`.
#[derive(Debug, Clone)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub message: Option<String>,
}

impl StepUpdate {
    pub fn running() -> Self {
        Self {
            status: StepStatus::Running,
            message: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: StepStatus::Completed,
            message: None,
        }
    }

    pub fn completed_with(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Completed,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            message: Some(message.into()),
        }
    }
}

/// Parameters for inserting a canonical insight.
#[derive(Debug, Clone)]
pub struct NewDocumentInsight {
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub catalogue_key: DocumentKind,
    pub schema_version: i32,
    pub parser_version: String,
    pub prompt_version: Option<String>,
    pub model_version: Option<String>,
    pub confidence: f64,
    pub content_hash: String,
    pub document_date: Option<NaiveDate>,
    pub document_month: Month,
    pub metrics: InsightMetrics,
    pub transactions: Vec<Transaction>,
    pub metadata: JsonValue,
    pub notes: Vec<String>,
}

/// Parameters for upserting an account by fingerprint.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: Uuid,
    pub institution: String,
    pub raw_institution_name: String,
    pub account_type: DocumentKind,
    pub account_number_hash: Option<String>,
    pub account_number_masked: Option<String>,
    pub fingerprint: String,
}

/// Parameters for recording a user override.
#[derive(Debug, Clone)]
pub struct NewUserOverride {
    pub user_id: Uuid,
    pub scope: OverrideScope,
    pub target: String,
    pub patch: JsonValue,
    pub effective_from: NaiveDate,
}

/// Parameters for the wholesale snapshot upsert.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub user_id: Uuid,
    pub month: Month,
    pub figures: JsonValue,
    pub insight_count: i32,
    pub transaction_count: i32,
}

/// Parameters for recording a dead letter.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub reason: DeadLetterReason,
    pub details: Option<String>,
}

// ============================================================================
// Outbox
// ============================================================================

/// Durable at-least-once trigger queue.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a pending job. Returns only once the row is committed, so an
    /// enqueue surviving a crash is guaranteed to be delivered eventually.
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<Uuid>;

    /// Insert unless a pending or processing job with the same queue and
    /// dedupe key already exists. Returns `None` when skipped.
    async fn enqueue_deduplicated(
        &self,
        queue: &str,
        payload: JsonValue,
        dedupe_key: &str,
    ) -> Result<Option<Uuid>>;

    /// Atomically claim the oldest available pending job on a queue,
    /// moving it to `processing` and incrementing its attempt count.
    /// Safe to race from multiple workers.
    async fn claim(&self, queue: &str) -> Result<Option<OutboxJob>>;

    /// Mark a delivered job completed. The row is retained for audit.
    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Record a delivery failure and make the job pending again after an
    /// exponential backoff delay.
    async fn fail(&self, id: Uuid, error: &str) -> Result<()>;

    /// Reset `processing` jobs whose claim is older than the cutoff back to
    /// `pending`. Covers workers that died mid-delivery.
    async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64>;

    /// Pending jobs currently claimable on a queue.
    async fn pending_count(&self, queue: &str) -> Result<i64>;

    /// Per-queue delivery counters.
    async fn queue_stats(&self) -> Result<Vec<OutboxQueueStats>>;

    async fn get(&self, id: Uuid) -> Result<OutboxJob>;
}

// ============================================================================
// Pipeline jobs
// ============================================================================

/// Per-document state machine storage.
#[async_trait]
pub trait PipelineJobRepository: Send + Sync {
    /// Create a queued job with the initial step vector.
    async fn create(&self, req: NewPipelineJob) -> Result<Uuid>;

    /// Atomically claim the oldest retryable job: status `queued` or
    /// `failed`, attempts below the cap, id not in `exclude`. Flips it to
    /// `running`, increments attempts, clears the last error, and resets
    /// steps from `classified` onward so the retry restarts from the top.
    /// This claim is the sole cross-process mutual exclusion point.
    ///
    /// `exclude` lets a drain give every document one attempt per delivery:
    /// a retryably-failed job stays claimable, so without it the drain
    /// would re-claim the same job until its attempts ran out, with no
    /// backoff between tries.
    async fn claim(&self, exclude: &[Uuid]) -> Result<Option<PipelineJob>>;

    /// Idempotently update one step. Entering `Running` stamps `started_at`
    /// once; entering `Completed`/`Failed` stamps `ended_at`.
    async fn mark_step(&self, job_id: Uuid, step: StepName, update: StepUpdate) -> Result<()>;

    /// Mark the named step and everything after it failed. A step failure is
    /// terminal for the whole document run.
    async fn fail_remaining_steps(&self, job_id: Uuid, from: StepName, message: &str)
        -> Result<()>;

    /// Set the job's terminal (or retry-eligible `Failed`) status.
    async fn finalize(
        &self,
        job_id: Uuid,
        status: PipelineJobStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Move `running` jobs with a claim older than the cutoff back to
    /// `failed` so they become claimable again.
    async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64>;

    async fn get(&self, id: Uuid) -> Result<PipelineJob>;

    async fn get_by_file(&self, user_id: Uuid, file_id: Uuid) -> Result<Option<PipelineJob>>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<PipelineJob>>;
}

// ============================================================================
// Insights
// ============================================================================

#[async_trait]
pub trait InsightRepository: Send + Sync {
    /// Insert a canonical insight. Insights are immutable per
    /// `(user, file, schema_version)`: a conflicting insert is a no-op and
    /// the existing row is returned.
    async fn insert(&self, req: NewDocumentInsight) -> Result<DocumentInsight>;

    async fn get(&self, id: Uuid) -> Result<DocumentInsight>;

    /// All insights for a user's month, ordered by creation for stable
    /// aggregation walks.
    async fn list_for_month(&self, user_id: Uuid, month: Month) -> Result<Vec<DocumentInsight>>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<DocumentInsight>>;
}

// ============================================================================
// Accounts
// ============================================================================

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create the account if its fingerprint is new, otherwise return the
    /// existing row untouched.
    async fn upsert(&self, req: NewAccount) -> Result<Account>;

    /// Apply a validated array-update plan to an account. Implementations
    /// must run [`UpdatePlan::validate`] before touching the row.
    async fn apply_update(&self, account_id: Uuid, plan: &UpdatePlan) -> Result<Account>;

    async fn find_by_fingerprint(&self, user_id: Uuid, fingerprint: &str)
        -> Result<Option<Account>>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Account>>;
}

// ============================================================================
// Overrides
// ============================================================================

#[async_trait]
pub trait OverrideRepository: Send + Sync {
    async fn insert(&self, req: NewUserOverride) -> Result<UserOverride>;

    /// Overrides effective on or before the given date, oldest first so
    /// later corrections win ties.
    async fn list_effective(&self, user_id: Uuid, on_or_before: NaiveDate)
        -> Result<Vec<UserOverride>>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

// ============================================================================
// Snapshots
// ============================================================================

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Replace the `(user, month)` snapshot wholesale in one statement, so a
    /// half-applied rebuild can never be observed.
    async fn upsert(&self, req: NewSnapshot) -> Result<UserAnalyticsSnapshot>;

    async fn get(&self, user_id: Uuid, month: Month) -> Result<Option<UserAnalyticsSnapshot>>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserAnalyticsSnapshot>>;
}

// ============================================================================
// Dead letters
// ============================================================================

#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn record(&self, req: NewDeadLetter) -> Result<Uuid>;

    /// Recent dead letters, newest first, optionally scoped to one user.
    async fn list(&self, user_id: Option<Uuid>, limit: i64) -> Result<Vec<DeadLetterEntry>>;
}

// ============================================================================
// Object storage
// ============================================================================

/// Byte-stream storage boundary. The pipeline only ever reads uploaded
/// documents; writes exist for ingestion tooling and tests.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data under a key, atomically replacing any existing value.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read the value for a key.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;
}
