//! Dead letter repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::{
    new_v7, DeadLetterEntry, DeadLetterReason, DeadLetterRepository, Error, NewDeadLetter, Result,
};

/// PostgreSQL implementation of DeadLetterRepository.
pub struct PgDeadLetterRepository {
    pool: Pool<Postgres>,
}

impl PgDeadLetterRepository {
    /// Create a new PgDeadLetterRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a dead letter row into a DeadLetterEntry struct.
    fn parse_entry_row(row: sqlx::postgres::PgRow) -> DeadLetterEntry {
        let reason = DeadLetterReason::parse(row.get("reason"))
            .unwrap_or(DeadLetterReason::AttemptsExhausted); // fallback
        DeadLetterEntry {
            id: row.get("id"),
            user_id: row.get("user_id"),
            file_id: row.get("file_id"),
            reason,
            details: row.get("details"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl DeadLetterRepository for PgDeadLetterRepository {
    async fn record(&self, req: NewDeadLetter) -> Result<Uuid> {
        let entry_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO dead_letters (id, user_id, file_id, reason, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry_id)
        .bind(req.user_id)
        .bind(req.file_id)
        .bind(req.reason.as_str())
        .bind(&req.details)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(entry_id)
    }

    async fn list(&self, user_id: Option<Uuid>, limit: i64) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, file_id, reason, details, created_at
             FROM dead_letters
             WHERE ($1::uuid IS NULL OR user_id = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_entry_row).collect())
    }
}
