//! Pipeline job repository implementation.
//!
//! One row per document, carrying the step ladder as a JSONB vector. The
//! atomic claim here is the only cross-process mutual exclusion in the
//! pipeline: once a worker holds a claimed job, it is the sole writer of
//! that row until it finalizes or its claim goes stale.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::defaults::PIPELINE_MAX_ATTEMPTS;
use sterling_core::{
    initial_steps, new_v7, Error, NewPipelineJob, PipelineJob, PipelineJobRepository,
    PipelineJobStatus, PipelineStep, Result, StepName, StepStatus, StepUpdate,
};

/// PostgreSQL implementation of PipelineJobRepository.
pub struct PgPipelineJobRepository {
    pool: Pool<Postgres>,
}

impl PgPipelineJobRepository {
    /// Create a new PgPipelineJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert PipelineJobStatus to string for database.
    fn status_to_str(status: PipelineJobStatus) -> &'static str {
        match status {
            PipelineJobStatus::Queued => "queued",
            PipelineJobStatus::Running => "running",
            PipelineJobStatus::Completed => "completed",
            PipelineJobStatus::Failed => "failed",
            PipelineJobStatus::DeadLetter => "dead_letter",
        }
    }

    /// Convert string from database to PipelineJobStatus.
    fn str_to_status(s: &str) -> PipelineJobStatus {
        match s {
            "queued" => PipelineJobStatus::Queued,
            "running" => PipelineJobStatus::Running,
            "completed" => PipelineJobStatus::Completed,
            "failed" => PipelineJobStatus::Failed,
            "dead_letter" => PipelineJobStatus::DeadLetter,
            _ => PipelineJobStatus::Queued, // fallback
        }
    }

    /// Parse a pipeline job row into a PipelineJob struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<PipelineJob> {
        let steps: Vec<PipelineStep> = serde_json::from_value(row.get("steps"))?;
        Ok(PipelineJob {
            id: row.get("id"),
            user_id: row.get("user_id"),
            file_id: row.get("file_id"),
            original_name: row.get("original_name"),
            collection_id: row.get("collection_id"),
            display_name: row.get("display_name"),
            storage_key: row.get("storage_key"),
            status: Self::str_to_status(row.get("status")),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            steps,
            last_error: row.get("last_error"),
            claimed_at: row.get("claimed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Reset the retryable part of a step vector: classification and every
    /// later step go back to pending, upload and queueing stay as history.
    fn reset_steps_for_retry(steps: &mut [PipelineStep]) -> bool {
        let mut changed = false;
        for step in steps.iter_mut() {
            if step.name.position() >= StepName::Classified.position()
                && step.status != StepStatus::Pending
            {
                *step = PipelineStep::pending(step.name);
                changed = true;
            }
        }
        changed
    }

    const COLUMNS: &'static str = "id, user_id, file_id, original_name, collection_id, \
         display_name, storage_key, status, attempts, max_attempts, steps, last_error, \
         claimed_at, created_at, updated_at";
}

#[async_trait]
impl PipelineJobRepository for PgPipelineJobRepository {
    async fn create(&self, req: NewPipelineJob) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();
        let max_attempts = req.max_attempts.unwrap_or(PIPELINE_MAX_ATTEMPTS);
        let steps = serde_json::to_value(initial_steps(now))?;

        sqlx::query(
            "INSERT INTO pipeline_jobs
                 (id, user_id, file_id, original_name, collection_id, display_name,
                  storage_key, status, attempts, max_attempts, steps, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', 0, $8, $9, $10, $10)",
        )
        .bind(job_id)
        .bind(req.user_id)
        .bind(req.file_id)
        .bind(&req.original_name)
        .bind(req.collection_id)
        .bind(&req.display_name)
        .bind(&req.storage_key)
        .bind(max_attempts)
        .bind(&steps)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn claim(&self, exclude: &[Uuid]) -> Result<Option<PipelineJob>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // FOR UPDATE SKIP LOCKED keeps concurrent workers off each other's
        // rows. Both fresh (queued) and retryable (failed, attempts left)
        // jobs are claimable; oldest first. The exclusion list keeps one
        // drain from re-claiming a job it already ran.
        let query = format!(
            "UPDATE pipeline_jobs
             SET status = 'running', attempts = attempts + 1, claimed_at = $1,
                 last_error = NULL, updated_at = $1
             WHERE id = (
                 SELECT id FROM pipeline_jobs
                 WHERE status IN ('queued', 'failed') AND attempts < max_attempts
                   AND NOT (id = ANY($2))
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            Self::COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(now)
            .bind(exclude)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let Some(row) = row else {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(None);
        };

        let mut job = Self::parse_job_row(row)?;

        // A retry restarts from the top of the retryable ladder. Persist the
        // reset inside the claim transaction so a claimed job is never
        // observed with stale step results.
        if Self::reset_steps_for_retry(&mut job.steps) {
            sqlx::query("UPDATE pipeline_jobs SET steps = $1, updated_at = $2 WHERE id = $3")
                .bind(serde_json::to_value(&job.steps)?)
                .bind(now)
                .bind(job.id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(Some(job))
    }

    async fn mark_step(&self, job_id: Uuid, step: StepName, update: StepUpdate) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let steps_value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT steps FROM pipeline_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let Some(steps_value) = steps_value else {
            return Err(Error::JobNotFound(job_id));
        };
        let mut steps: Vec<PipelineStep> = serde_json::from_value(steps_value)?;

        let entry = steps
            .iter_mut()
            .find(|s| s.name == step)
            .ok_or_else(|| Error::Internal(format!("job {job_id} has no step {step}")))?;

        match update.status {
            StepStatus::Running => {
                if entry.started_at.is_none() {
                    entry.started_at = Some(now);
                }
            }
            StepStatus::Completed | StepStatus::Failed => {
                if entry.ended_at.is_none() {
                    entry.ended_at = Some(now);
                }
            }
            StepStatus::Pending => {
                entry.started_at = None;
                entry.ended_at = None;
            }
        }
        entry.status = update.status;
        if update.message.is_some() {
            entry.message = update.message;
        }

        sqlx::query("UPDATE pipeline_jobs SET steps = $1, updated_at = $2 WHERE id = $3")
            .bind(serde_json::to_value(&steps)?)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn fail_remaining_steps(
        &self,
        job_id: Uuid,
        from: StepName,
        message: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let steps_value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT steps FROM pipeline_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let Some(steps_value) = steps_value else {
            return Err(Error::JobNotFound(job_id));
        };
        let mut steps: Vec<PipelineStep> = serde_json::from_value(steps_value)?;

        // The failing step carries the message; everything after it is
        // short-circuited. Completed steps before the failure keep their
        // record.
        for entry in steps.iter_mut() {
            if entry.name.position() < from.position() {
                continue;
            }
            if entry.name == from {
                entry.status = StepStatus::Failed;
                entry.message = Some(message.to_string());
                if entry.ended_at.is_none() {
                    entry.ended_at = Some(now);
                }
            } else if entry.status != StepStatus::Completed {
                entry.status = StepStatus::Failed;
                if entry.ended_at.is_none() {
                    entry.ended_at = Some(now);
                }
            }
        }

        sqlx::query("UPDATE pipeline_jobs SET steps = $1, updated_at = $2 WHERE id = $3")
            .bind(serde_json::to_value(&steps)?)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        status: PipelineJobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE pipeline_jobs SET status = $1, last_error = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(Self::status_to_str(status))
        .bind(error)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs);

        // Reverting to failed (not queued) keeps the attempt spent: a
        // crashing worker burns one of the document's attempts. A job whose
        // spent attempt was its last goes straight to dead_letter, since no
        // claim will ever pick it up again.
        let result = sqlx::query(
            "UPDATE pipeline_jobs
             SET status = CASE WHEN attempts >= max_attempts
                               THEN 'dead_letter' ELSE 'failed' END,
                 last_error = 'claim expired', updated_at = NOW()
             WHERE status = 'running' AND claimed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid) -> Result<PipelineJob> {
        let query = format!("SELECT {} FROM pipeline_jobs WHERE id = $1", Self::COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(Error::JobNotFound(id)),
        }
    }

    async fn get_by_file(&self, user_id: Uuid, file_id: Uuid) -> Result<Option<PipelineJob>> {
        let query = format!(
            "SELECT {} FROM pipeline_jobs
             WHERE user_id = $1 AND file_id = $2
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            Self::COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<PipelineJob>> {
        let query = format!(
            "SELECT {} FROM pipeline_jobs
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
            Self::COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
