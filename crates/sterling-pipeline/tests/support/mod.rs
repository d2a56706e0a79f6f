//! Shared in-memory fixtures for the integration tests.
//!
//! Each repository trait gets a fake that mirrors the Postgres
//! implementation's ordering and transition rules (claim order, retry
//! backoff, step resets, conflict no-ops), so the processor, driver, and
//! analytics paths can run end to end without a database. State sits behind
//! plain mutexes; no fake awaits while holding a lock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use sterling_core::defaults::{
    OUTBOX_BACKOFF_BASE_SECS, OUTBOX_BACKOFF_CAP_SECS, OUTBOX_MAX_ATTEMPTS, PIPELINE_MAX_ATTEMPTS,
};
use sterling_core::{
    initial_steps, new_v7, Account, AccountRepository, DeadLetterEntry, DeadLetterRepository,
    DocumentInsight, Error, InsightRepository, Month, NewAccount, NewDeadLetter,
    NewDocumentInsight, NewPipelineJob, NewSnapshot, NewUserOverride, OutboxJob, OutboxJobState,
    OutboxQueueStats, OutboxRepository, OverrideRepository, PipelineJob, PipelineJobRepository,
    PipelineJobStatus, PipelineStep, Result, SnapshotRepository, StepName, StepStatus, StepUpdate,
    StorageBackend, UpdatePlan, UserAnalyticsSnapshot, UserOverride,
};
use sterling_db::object_store::document_storage_key;
use sterling_pipeline::Stores;

// ============================================================================
// Outbox
// ============================================================================

/// In-memory [`OutboxRepository`] with the production claim, dedupe, and
/// backoff rules.
#[derive(Default)]
pub struct MemoryOutbox {
    jobs: Mutex<Vec<OutboxJob>>,
}

fn backoff_delay_secs(attempts: i32) -> i64 {
    let exp = attempts.clamp(0, 16) as u32;
    OUTBOX_BACKOFF_BASE_SECS
        .saturating_mul(2u64.saturating_pow(exp))
        .min(OUTBOX_BACKOFF_CAP_SECS) as i64
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull a backed-off job's `available_at` forward to now so a test can
    /// redeliver without waiting out the real delay.
    pub fn make_available(&self, id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.available_at = Utc::now();
        }
    }

    /// Backdate a processing job's claim so stale reclaim sees it.
    pub fn backdate_claim(&self, id: Uuid, secs: i64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.updated_at = Utc::now() - Duration::seconds(secs);
        }
    }

    pub fn snapshot(&self) -> Vec<OutboxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboxRepository for MemoryOutbox {
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<Uuid> {
        let now = Utc::now();
        let id = new_v7();
        self.jobs.lock().unwrap().push(OutboxJob {
            id,
            queue: queue.to_string(),
            payload,
            state: OutboxJobState::Pending,
            attempts: 0,
            available_at: now,
            dedupe_key: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn enqueue_deduplicated(
        &self,
        queue: &str,
        payload: JsonValue,
        dedupe_key: &str,
    ) -> Result<Option<Uuid>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let live = jobs.iter().any(|j| {
            j.queue == queue
                && j.dedupe_key.as_deref() == Some(dedupe_key)
                && matches!(
                    j.state,
                    OutboxJobState::Pending | OutboxJobState::Processing
                )
        });
        if live {
            return Ok(None);
        }
        let id = new_v7();
        jobs.push(OutboxJob {
            id,
            queue: queue.to_string(),
            payload,
            state: OutboxJobState::Pending,
            attempts: 0,
            available_at: now,
            dedupe_key: Some(dedupe_key.to_string()),
            last_error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(Some(id))
    }

    async fn claim(&self, queue: &str) -> Result<Option<OutboxJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs
            .iter_mut()
            .filter(|j| {
                j.queue == queue && j.state == OutboxJobState::Pending && j.available_at <= now
            })
            .min_by_key(|j| (j.created_at, j.id))
        else {
            return Ok(None);
        };
        job.state = OutboxJobState::Processing;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.state = OutboxJobState::Completed;
            job.last_error = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            if job.attempts < OUTBOX_MAX_ATTEMPTS {
                job.state = OutboxJobState::Pending;
                job.available_at = now + Duration::seconds(backoff_delay_secs(job.attempts));
            } else {
                job.state = OutboxJobState::Failed;
            }
            job.last_error = Some(error.to_string());
            job.updated_at = now;
        }
        Ok(())
    }

    async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(older_than_secs);
        let mut jobs = self.jobs.lock().unwrap();
        let mut reclaimed = 0;
        for job in jobs.iter_mut() {
            if job.state == OutboxJobState::Processing && job.updated_at < cutoff {
                job.state = OutboxJobState::Pending;
                job.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        let now = Utc::now();
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| {
                j.queue == queue && j.state == OutboxJobState::Pending && j.available_at <= now
            })
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<Vec<OutboxQueueStats>> {
        let jobs = self.jobs.lock().unwrap();
        let mut by_queue: HashMap<String, OutboxQueueStats> = HashMap::new();
        for job in jobs.iter() {
            let entry = by_queue
                .entry(job.queue.clone())
                .or_insert_with(|| OutboxQueueStats {
                    queue: job.queue.clone(),
                    pending: 0,
                    processing: 0,
                    completed: 0,
                    failed: 0,
                });
            match job.state {
                OutboxJobState::Pending => entry.pending += 1,
                OutboxJobState::Processing => entry.processing += 1,
                OutboxJobState::Completed => entry.completed += 1,
                OutboxJobState::Failed => entry.failed += 1,
            }
        }
        let mut stats: Vec<_> = by_queue.into_values().collect();
        stats.sort_by(|a, b| a.queue.cmp(&b.queue));
        Ok(stats)
    }

    async fn get(&self, id: Uuid) -> Result<OutboxJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }
}

// ============================================================================
// Pipeline jobs
// ============================================================================

/// In-memory [`PipelineJobRepository`] with the production claim filter,
/// step reset, and stale-reclaim transitions.
#[derive(Default)]
pub struct MemoryPipelineJobs {
    jobs: Mutex<Vec<PipelineJob>>,
}

impl MemoryPipelineJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a running job's claim so stale reclaim sees it.
    pub fn backdate_claim(&self, id: Uuid, secs: i64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.claimed_at = Some(Utc::now() - Duration::seconds(secs));
        }
    }
}

#[async_trait]
impl PipelineJobRepository for MemoryPipelineJobs {
    async fn create(&self, req: NewPipelineJob) -> Result<Uuid> {
        let now = Utc::now();
        let id = new_v7();
        self.jobs.lock().unwrap().push(PipelineJob {
            id,
            user_id: req.user_id,
            file_id: req.file_id,
            original_name: req.original_name,
            collection_id: req.collection_id,
            display_name: req.display_name,
            storage_key: req.storage_key,
            status: PipelineJobStatus::Queued,
            attempts: 0,
            max_attempts: req.max_attempts.unwrap_or(PIPELINE_MAX_ATTEMPTS),
            steps: initial_steps(now),
            last_error: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn claim(&self, exclude: &[Uuid]) -> Result<Option<PipelineJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs
            .iter_mut()
            .filter(|j| {
                matches!(
                    j.status,
                    PipelineJobStatus::Queued | PipelineJobStatus::Failed
                ) && j.attempts < j.max_attempts
                    && !exclude.contains(&j.id)
            })
            .min_by_key(|j| (j.created_at, j.id))
        else {
            return Ok(None);
        };
        job.status = PipelineJobStatus::Running;
        job.attempts += 1;
        job.claimed_at = Some(now);
        job.last_error = None;
        for step in job.steps.iter_mut() {
            if step.name.position() >= StepName::Classified.position()
                && step.status != StepStatus::Pending
            {
                *step = PipelineStep::pending(step.name);
            }
        }
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_step(&self, job_id: Uuid, step: StepName, update: StepUpdate) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        let slot = job
            .steps
            .iter_mut()
            .find(|s| s.name == step)
            .ok_or_else(|| {
                Error::Internal(format!("job {job_id} has no step {}", step.as_str()))
            })?;
        slot.status = update.status;
        match update.status {
            StepStatus::Running => {
                if slot.started_at.is_none() {
                    slot.started_at = Some(now);
                }
            }
            StepStatus::Completed | StepStatus::Failed => {
                if slot.ended_at.is_none() {
                    slot.ended_at = Some(now);
                }
            }
            StepStatus::Pending => {
                slot.started_at = None;
                slot.ended_at = None;
            }
        }
        if update.message.is_some() {
            slot.message = update.message;
        }
        job.updated_at = now;
        Ok(())
    }

    async fn fail_remaining_steps(
        &self,
        job_id: Uuid,
        from: StepName,
        message: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        for step in job.steps.iter_mut() {
            if step.name.position() < from.position() {
                continue;
            }
            if step.name == from {
                step.status = StepStatus::Failed;
                step.message = Some(message.to_string());
                if step.ended_at.is_none() {
                    step.ended_at = Some(now);
                }
            } else if step.status != StepStatus::Completed {
                step.status = StepStatus::Failed;
                if step.ended_at.is_none() {
                    step.ended_at = Some(now);
                }
            }
        }
        job.updated_at = now;
        Ok(())
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        status: PipelineJobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        job.status = status;
        job.last_error = error.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(older_than_secs);
        let mut jobs = self.jobs.lock().unwrap();
        let mut reclaimed = 0;
        for job in jobs.iter_mut() {
            let stale = job.status == PipelineJobStatus::Running
                && job.claimed_at.is_some_and(|at| at < cutoff);
            if stale {
                job.status = if job.attempts >= job.max_attempts {
                    PipelineJobStatus::DeadLetter
                } else {
                    PipelineJobStatus::Failed
                };
                job.last_error = Some("claim expired".to_string());
                job.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn get(&self, id: Uuid) -> Result<PipelineJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }

    async fn get_by_file(&self, user_id: Uuid, file_id: Uuid) -> Result<Option<PipelineJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| j.user_id == user_id && j.file_id == file_id)
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<PipelineJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut out: Vec<_> = jobs
            .iter()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

// ============================================================================
// Insights
// ============================================================================

#[derive(Default)]
pub struct MemoryInsights {
    rows: Mutex<Vec<DocumentInsight>>,
}

impl MemoryInsights {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InsightRepository for MemoryInsights {
    async fn insert(&self, req: NewDocumentInsight) -> Result<DocumentInsight> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter().find(|r| {
            r.user_id == req.user_id
                && r.file_id == req.file_id
                && r.schema_version == req.schema_version
        }) {
            return Ok(existing.clone());
        }
        let insight = DocumentInsight {
            id: new_v7(),
            user_id: req.user_id,
            file_id: req.file_id,
            catalogue_key: req.catalogue_key,
            schema_version: req.schema_version,
            parser_version: req.parser_version,
            prompt_version: req.prompt_version,
            model_version: req.model_version,
            confidence: req.confidence,
            content_hash: req.content_hash,
            document_date: req.document_date,
            document_month: req.document_month,
            metrics: req.metrics,
            transactions: req.transactions,
            metadata: req.metadata,
            notes: req.notes,
            created_at: Utc::now(),
        };
        rows.push(insight.clone());
        Ok(insight)
    }

    async fn get(&self, id: Uuid) -> Result<DocumentInsight> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(Error::InsightNotFound(id))
    }

    async fn list_for_month(&self, user_id: Uuid, month: Month) -> Result<Vec<DocumentInsight>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.user_id == user_id && r.document_month == month)
            .cloned()
            .collect())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<DocumentInsight>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<_> = rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Default)]
pub struct MemoryAccounts {
    rows: Mutex<Vec<Account>>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryAccounts {
    async fn upsert(&self, req: NewAccount) -> Result<Account> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .iter()
            .find(|a| a.user_id == req.user_id && a.fingerprint == req.fingerprint)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let account = Account {
            id: new_v7(),
            user_id: req.user_id,
            institution: req.institution,
            raw_institution_names: vec![req.raw_institution_name],
            account_type: req.account_type,
            account_number_hash: req.account_number_hash,
            account_number_masked: req.account_number_masked,
            fingerprint: req.fingerprint,
            created_at: now,
            updated_at: now,
        };
        rows.push(account.clone());
        Ok(account)
    }

    async fn apply_update(&self, account_id: Uuid, plan: &UpdatePlan) -> Result<Account> {
        plan.validate()?;
        let mut rows = self.rows.lock().unwrap();
        let account = rows
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        if plan.is_empty() {
            return Ok(account.clone());
        }
        for path in plan.paths() {
            match path {
                "raw_institution_names" => {
                    account.raw_institution_names =
                        plan.apply_path(path, &account.raw_institution_names)?;
                }
                other => {
                    return Err(Error::InvalidInput(format!(
                        "unknown account array path: {other}"
                    )))
                }
            }
        }
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Account>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.user_id == user_id && a.fingerprint == fingerprint)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<_> = rows
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.institution.cmp(&b.institution));
        Ok(out)
    }
}

// ============================================================================
// Overrides, snapshots, dead letters
// ============================================================================

#[derive(Default)]
pub struct MemoryOverrides {
    rows: Mutex<Vec<UserOverride>>,
}

impl MemoryOverrides {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideRepository for MemoryOverrides {
    async fn insert(&self, req: NewUserOverride) -> Result<UserOverride> {
        let row = UserOverride {
            id: new_v7(),
            user_id: req.user_id,
            scope: req.scope,
            target: req.target,
            patch: req.patch,
            effective_from: req.effective_from,
            created_at: Utc::now(),
        };
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn list_effective(
        &self,
        user_id: Uuid,
        on_or_before: NaiveDate,
    ) -> Result<Vec<UserOverride>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<_> = rows
            .iter()
            .filter(|o| o.user_id == user_id && o.effective_from <= on_or_before)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.rows.lock().unwrap().retain(|o| o.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshots {
    rows: Mutex<Vec<UserAnalyticsSnapshot>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshots {
    async fn upsert(&self, req: NewSnapshot) -> Result<UserAnalyticsSnapshot> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .iter_mut()
            .find(|s| s.user_id == req.user_id && s.month == req.month)
        {
            existing.figures = req.figures;
            existing.insight_count = req.insight_count;
            existing.transaction_count = req.transaction_count;
            existing.generated_at = now;
            return Ok(existing.clone());
        }
        let snapshot = UserAnalyticsSnapshot {
            id: new_v7(),
            user_id: req.user_id,
            month: req.month,
            figures: req.figures,
            insight_count: req.insight_count,
            transaction_count: req.transaction_count,
            generated_at: now,
        };
        rows.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn get(&self, user_id: Uuid, month: Month) -> Result<Option<UserAnalyticsSnapshot>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id == user_id && s.month == month)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserAnalyticsSnapshot>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<_> = rows
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.month.cmp(&a.month));
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryDeadLetters {
    rows: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterRepository for MemoryDeadLetters {
    async fn record(&self, req: NewDeadLetter) -> Result<Uuid> {
        let id = new_v7();
        self.rows.lock().unwrap().push(DeadLetterEntry {
            id,
            user_id: req.user_id,
            file_id: req.file_id,
            reason: req.reason,
            details: req.details,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list(&self, user_id: Option<Uuid>, limit: i64) -> Result<Vec<DeadLetterEntry>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<_> = rows
            .iter()
            .filter(|d| user_id.map_or(true, |u| d.user_id == u))
            .cloned()
            .collect();
        out.reverse();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

// ============================================================================
// Object storage
// ============================================================================

/// In-memory [`StorageBackend`] keyed like the filesystem store.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no object at {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// All fakes wired together. Concrete handles stay alongside the trait-object
/// [`Stores`] so tests can reach the fake-only helpers.
pub struct TestStores {
    pub outbox: Arc<MemoryOutbox>,
    pub pipeline: Arc<MemoryPipelineJobs>,
    pub insights: Arc<MemoryInsights>,
    pub accounts: Arc<MemoryAccounts>,
    pub overrides: Arc<MemoryOverrides>,
    pub snapshots: Arc<MemorySnapshots>,
    pub dead_letters: Arc<MemoryDeadLetters>,
    pub storage: Arc<MemoryStorage>,
}

impl TestStores {
    pub fn new() -> Self {
        Self {
            outbox: Arc::new(MemoryOutbox::new()),
            pipeline: Arc::new(MemoryPipelineJobs::new()),
            insights: Arc::new(MemoryInsights::new()),
            accounts: Arc::new(MemoryAccounts::new()),
            overrides: Arc::new(MemoryOverrides::new()),
            snapshots: Arc::new(MemorySnapshots::new()),
            dead_letters: Arc::new(MemoryDeadLetters::new()),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            outbox: self.outbox.clone(),
            pipeline: self.pipeline.clone(),
            insights: self.insights.clone(),
            accounts: self.accounts.clone(),
            overrides: self.overrides.clone(),
            snapshots: self.snapshots.clone(),
            dead_letters: self.dead_letters.clone(),
            storage: self.storage.clone(),
        }
    }

    /// Store document bytes under the canonical key and create a queued
    /// pipeline job for them, as the upload path would.
    pub async fn seed_document(
        &self,
        user_id: Uuid,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<(Uuid, Uuid)> {
        let file_id = new_v7();
        let key = document_storage_key(&user_id, &file_id);
        self.storage.write(&key, bytes).await?;
        let document_id = self
            .pipeline
            .create(NewPipelineJob {
                user_id,
                file_id,
                original_name: original_name.to_string(),
                collection_id: None,
                display_name: None,
                storage_key: key,
                max_attempts: None,
            })
            .await?;
        Ok((file_id, document_id))
    }
}

/// A synthetic claimed outbox job for driving a processor directly.
pub fn trigger(queue: &str, payload: JsonValue) -> OutboxJob {
    let now = Utc::now();
    OutboxJob {
        id: new_v7(),
        queue: queue.to_string(),
        payload,
        state: OutboxJobState::Processing,
        attempts: 1,
        available_at: now,
        dedupe_key: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

/// Poll a condition until it holds or five seconds pass.
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}

// ============================================================================
// Standardized payloads
// ============================================================================

/// A payslip payload whose deductions reconcile exactly.
pub fn payslip_payload() -> JsonValue {
    json!({
        "employer": "Acme Widgets Ltd",
        "payDate": "2026-03-28",
        "grossPay": 3500.0,
        "incomeTax": 450.0,
        "nationalInsurance": 280.0,
        "pension": 175.0,
        "otherDeductions": 95.0,
        "netPay": 2500.0,
        "niNumber": "QQ123456C",
    })
}

/// A current-account statement whose balances reconcile, with one credit and
/// one debit row.
pub fn statement_payload(institution: &str) -> JsonValue {
    json!({
        "institution": institution,
        "accountNumber": "12345678",
        "sortCode": "12-34-56",
        "openingBalance": 1200.50,
        "closingBalance": 2850.25,
        "totalIn": 2500.0,
        "totalOut": 850.25,
        "periodEnd": "2026-06-30",
        "transactions": [
            {
                "id": "txn-001",
                "date": "2026-06-25",
                "description": "ACME WIDGETS SALARY",
                "amount": 2500.0,
                "direction": "credit",
                "category": "Salary",
            },
            {
                "id": "txn-002",
                "date": "2026-06-26",
                "description": "TESCO STORES",
                "amount": -850.25,
                "category": "Groceries",
            },
        ],
    })
}
