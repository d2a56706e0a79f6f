//! Outbox repository implementation.
//!
//! The outbox is the durable trigger queue in front of the document
//! pipeline. Rows are inserted in the same database as the state they refer
//! to, claimed with `FOR UPDATE SKIP LOCKED`, and retained after completion.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::defaults::{
    OUTBOX_BACKOFF_BASE_SECS, OUTBOX_BACKOFF_CAP_SECS, OUTBOX_MAX_ATTEMPTS,
};
use sterling_core::{
    new_v7, Error, OutboxJob, OutboxJobState, OutboxQueueStats, OutboxRepository, Result,
};

/// PostgreSQL implementation of OutboxRepository.
pub struct PgOutboxRepository {
    pool: Pool<Postgres>,
}

impl PgOutboxRepository {
    /// Create a new PgOutboxRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert OutboxJobState to string for database.
    fn state_to_str(state: OutboxJobState) -> &'static str {
        match state {
            OutboxJobState::Pending => "pending",
            OutboxJobState::Processing => "processing",
            OutboxJobState::Completed => "completed",
            OutboxJobState::Failed => "failed",
        }
    }

    /// Convert string from database to OutboxJobState.
    fn str_to_state(s: &str) -> OutboxJobState {
        match s {
            "pending" => OutboxJobState::Pending,
            "processing" => OutboxJobState::Processing,
            "completed" => OutboxJobState::Completed,
            "failed" => OutboxJobState::Failed,
            _ => OutboxJobState::Pending, // fallback
        }
    }

    /// Redelivery delay after the Nth attempt, in seconds.
    fn backoff_delay_secs(attempts: i32) -> i64 {
        let exp = attempts.clamp(0, 16) as u32;
        let delay = OUTBOX_BACKOFF_BASE_SECS.saturating_mul(2u64.saturating_pow(exp));
        delay.min(OUTBOX_BACKOFF_CAP_SECS) as i64
    }

    /// Parse an outbox row into an OutboxJob struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> OutboxJob {
        OutboxJob {
            id: row.get("id"),
            queue: row.get("queue"),
            payload: row.get("payload"),
            state: Self::str_to_state(row.get("state")),
            attempts: row.get("attempts"),
            available_at: row.get("available_at"),
            dedupe_key: row.get("dedupe_key"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO outbox_jobs (id, queue, payload, state, attempts, available_at, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', 0, $4, $4, $4)",
        )
        .bind(job_id)
        .bind(queue)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn enqueue_deduplicated(
        &self,
        queue: &str,
        payload: JsonValue,
        dedupe_key: &str,
    ) -> Result<Option<Uuid>> {
        let job_id = new_v7();
        let now = Utc::now();

        // The partial unique index on (queue, dedupe_key) over live states is
        // the arbiter: a concurrent duplicate lands on DO NOTHING and returns
        // no row.
        let result = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO outbox_jobs (id, queue, payload, state, attempts, available_at, dedupe_key, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', 0, $4, $5, $4, $4)
             ON CONFLICT (queue, dedupe_key) WHERE state IN ('pending', 'processing') DO NOTHING
             RETURNING id",
        )
        .bind(job_id)
        .bind(queue)
        .bind(&payload)
        .bind(now)
        .bind(dedupe_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result)
    }

    async fn claim(&self, queue: &str) -> Result<Option<OutboxJob>> {
        let now = Utc::now();

        // FOR UPDATE SKIP LOCKED makes concurrent claims race-free: each
        // worker locks a different row or finds none.
        let row = sqlx::query(
            "UPDATE outbox_jobs
             SET state = 'processing', attempts = attempts + 1, updated_at = $1
             WHERE id = (
                 SELECT id FROM outbox_jobs
                 WHERE queue = $2 AND state = 'pending' AND available_at <= $1
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, queue, payload, state, attempts, available_at, dedupe_key,
                       last_error, created_at, updated_at",
        )
        .bind(now)
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            "UPDATE outbox_jobs SET state = 'completed', last_error = NULL, updated_at = $1
             WHERE id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The claim already incremented attempts, so the count read here is
        // the number of deliveries tried so far.
        let attempts: i32 = sqlx::query_scalar("SELECT attempts FROM outbox_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;

        if attempts < OUTBOX_MAX_ATTEMPTS {
            // Redeliver after exponential backoff.
            let available_at = now + ChronoDuration::seconds(Self::backoff_delay_secs(attempts));
            sqlx::query(
                "UPDATE outbox_jobs
                 SET state = 'pending', available_at = $1, last_error = $2, updated_at = $3
                 WHERE id = $4",
            )
            .bind(available_at)
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            // Poison trigger: stop redelivering.
            sqlx::query(
                "UPDATE outbox_jobs
                 SET state = 'failed', last_error = $1, updated_at = $2
                 WHERE id = $3",
            )
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn reclaim_stale(&self, older_than_secs: i64) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs);

        // updated_at is stamped at claim time, so a processing row with an
        // old updated_at belongs to a worker that died mid-delivery.
        let result = sqlx::query(
            "UPDATE outbox_jobs
             SET state = 'pending', updated_at = NOW()
             WHERE state = 'processing' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        let now = Utc::now();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_jobs
             WHERE queue = $1 AND state = 'pending' AND available_at <= $2",
        )
        .bind(queue)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<Vec<OutboxQueueStats>> {
        let rows = sqlx::query(
            "SELECT queue,
                COUNT(*) FILTER (WHERE state = 'pending') as pending,
                COUNT(*) FILTER (WHERE state = 'processing') as processing,
                COUNT(*) FILTER (WHERE state = 'completed') as completed,
                COUNT(*) FILTER (WHERE state = 'failed') as failed
             FROM outbox_jobs
             GROUP BY queue
             ORDER BY queue",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| OutboxQueueStats {
                queue: row.get("queue"),
                pending: row.get::<i64, _>("pending"),
                processing: row.get::<i64, _>("processing"),
                completed: row.get::<i64, _>("completed"),
                failed: row.get::<i64, _>("failed"),
            })
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<OutboxJob> {
        let row = sqlx::query(
            "SELECT id, queue, payload, state, attempts, available_at, dedupe_key,
                    last_error, created_at, updated_at
             FROM outbox_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).ok_or(Error::JobNotFound(id))
    }
}
