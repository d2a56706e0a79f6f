//! Canonical insight repository implementation.
//!
//! Insights are immutable per `(user_id, file_id, schema_version)`. Retried
//! documents re-insert identical content and hit the conflict arm, so
//! downstream aggregation never sees a half-replaced insight.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::{
    new_v7, DocumentInsight, DocumentKind, Error, InsightMetrics, InsightRepository, Month,
    NewDocumentInsight, Result, Transaction,
};

/// PostgreSQL implementation of InsightRepository.
pub struct PgInsightRepository {
    pool: Pool<Postgres>,
}

impl PgInsightRepository {
    /// Create a new PgInsightRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse an insight row into a DocumentInsight struct.
    fn parse_insight_row(row: sqlx::postgres::PgRow) -> Result<DocumentInsight> {
        let metrics: InsightMetrics = serde_json::from_value(row.get("metrics"))?;
        let transactions: Vec<Transaction> = serde_json::from_value(row.get("transactions"))?;
        let document_month: Month = row.get::<String, _>("document_month").parse()?;

        Ok(DocumentInsight {
            id: row.get("id"),
            user_id: row.get("user_id"),
            file_id: row.get("file_id"),
            catalogue_key: DocumentKind::parse(row.get("catalogue_key")),
            schema_version: row.get("schema_version"),
            parser_version: row.get("parser_version"),
            prompt_version: row.get("prompt_version"),
            model_version: row.get("model_version"),
            confidence: row.get("confidence"),
            content_hash: row.get("content_hash"),
            document_date: row.get("document_date"),
            document_month,
            metrics,
            transactions,
            metadata: row.get("metadata"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
        })
    }

    const COLUMNS: &'static str = "id, user_id, file_id, catalogue_key, schema_version, \
         parser_version, prompt_version, model_version, confidence, content_hash, \
         document_date, document_month, metrics, transactions, metadata, notes, created_at";
}

#[async_trait]
impl InsightRepository for PgInsightRepository {
    async fn insert(&self, req: NewDocumentInsight) -> Result<DocumentInsight> {
        let insight_id = new_v7();
        let now = Utc::now();
        let metrics = serde_json::to_value(&req.metrics)?;
        let transactions = serde_json::to_value(&req.transactions)?;

        // ON CONFLICT DO NOTHING keeps the first write; the retry path then
        // reads the row it lost to.
        let query = format!(
            "INSERT INTO document_insights
                 (id, user_id, file_id, catalogue_key, schema_version, parser_version,
                  prompt_version, model_version, confidence, content_hash, document_date,
                  document_month, metrics, transactions, metadata, notes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             ON CONFLICT (user_id, file_id, schema_version) DO NOTHING
             RETURNING {}",
            Self::COLUMNS
        );

        let inserted = sqlx::query(&query)
            .bind(insight_id)
            .bind(req.user_id)
            .bind(req.file_id)
            .bind(req.catalogue_key.as_str())
            .bind(req.schema_version)
            .bind(&req.parser_version)
            .bind(&req.prompt_version)
            .bind(&req.model_version)
            .bind(req.confidence)
            .bind(&req.content_hash)
            .bind(req.document_date)
            .bind(req.document_month.to_string())
            .bind(&metrics)
            .bind(&transactions)
            .bind(&req.metadata)
            .bind(&req.notes)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        if let Some(row) = inserted {
            return Self::parse_insight_row(row);
        }

        let query = format!(
            "SELECT {} FROM document_insights
             WHERE user_id = $1 AND file_id = $2 AND schema_version = $3",
            Self::COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(req.user_id)
            .bind(req.file_id)
            .bind(req.schema_version)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_insight_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<DocumentInsight> {
        let query = format!("SELECT {} FROM document_insights WHERE id = $1", Self::COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_insight_row(row),
            None => Err(Error::InsightNotFound(id)),
        }
    }

    async fn list_for_month(&self, user_id: Uuid, month: Month) -> Result<Vec<DocumentInsight>> {
        let query = format!(
            "SELECT {} FROM document_insights
             WHERE user_id = $1 AND document_month = $2
             ORDER BY created_at ASC, id ASC",
            Self::COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(month.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_insight_row).collect()
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<DocumentInsight>> {
        let query = format!(
            "SELECT {} FROM document_insights
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

        rows.into_iter().map(Self::parse_insight_row).collect()
    }
}
