//! Analytics snapshot repository implementation.
//!
//! Snapshots are replaced wholesale in a single upsert. Readers see either
//! the previous rebuild or the new one, never a mixture.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::{
    new_v7, Error, Month, NewSnapshot, Result, SnapshotRepository, UserAnalyticsSnapshot,
};

/// PostgreSQL implementation of SnapshotRepository.
pub struct PgSnapshotRepository {
    pool: Pool<Postgres>,
}

impl PgSnapshotRepository {
    /// Create a new PgSnapshotRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a snapshot row into a UserAnalyticsSnapshot struct.
    fn parse_snapshot_row(row: sqlx::postgres::PgRow) -> Result<UserAnalyticsSnapshot> {
        let month: Month = row.get::<String, _>("month").parse()?;
        Ok(UserAnalyticsSnapshot {
            id: row.get("id"),
            user_id: row.get("user_id"),
            month,
            figures: row.get("figures"),
            insight_count: row.get("insight_count"),
            transaction_count: row.get("transaction_count"),
            generated_at: row.get("generated_at"),
        })
    }

    const COLUMNS: &'static str =
        "id, user_id, month, figures, insight_count, transaction_count, generated_at";
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn upsert(&self, req: NewSnapshot) -> Result<UserAnalyticsSnapshot> {
        let snapshot_id = new_v7();
        let now = Utc::now();

        // One statement, so a concurrent reader never observes a partially
        // rebuilt month.
        let query = format!(
            "INSERT INTO analytics_snapshots
                 (id, user_id, month, figures, insight_count, transaction_count, generated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id, month) DO UPDATE
             SET figures = EXCLUDED.figures,
                 insight_count = EXCLUDED.insight_count,
                 transaction_count = EXCLUDED.transaction_count,
                 generated_at = EXCLUDED.generated_at
             RETURNING {}",
            Self::COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(snapshot_id)
            .bind(req.user_id)
            .bind(req.month.to_string())
            .bind(&req.figures)
            .bind(req.insight_count)
            .bind(req.transaction_count)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_snapshot_row(row)
    }

    async fn get(&self, user_id: Uuid, month: Month) -> Result<Option<UserAnalyticsSnapshot>> {
        let query = format!(
            "SELECT {} FROM analytics_snapshots WHERE user_id = $1 AND month = $2",
            Self::COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(month.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_snapshot_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserAnalyticsSnapshot>> {
        // YYYY-MM strings sort chronologically.
        let query = format!(
            "SELECT {} FROM analytics_snapshots WHERE user_id = $1 ORDER BY month DESC",
            Self::COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_snapshot_row).collect()
    }
}
