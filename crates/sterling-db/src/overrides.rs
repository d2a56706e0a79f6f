//! User override repository implementation.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::{
    new_v7, Error, NewUserOverride, OverrideRepository, OverrideScope, Result, UserOverride,
};

/// PostgreSQL implementation of OverrideRepository.
pub struct PgOverrideRepository {
    pool: Pool<Postgres>,
}

impl PgOverrideRepository {
    /// Create a new PgOverrideRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert OverrideScope to string for database.
    fn scope_to_str(scope: OverrideScope) -> &'static str {
        match scope {
            OverrideScope::Transaction => "transaction",
            OverrideScope::Metric => "metric",
        }
    }

    /// Convert string from database to OverrideScope.
    fn str_to_scope(s: &str) -> OverrideScope {
        match s {
            "transaction" => OverrideScope::Transaction,
            "metric" => OverrideScope::Metric,
            _ => OverrideScope::Transaction, // fallback
        }
    }

    /// Parse an override row into a UserOverride struct.
    fn parse_override_row(row: sqlx::postgres::PgRow) -> UserOverride {
        UserOverride {
            id: row.get("id"),
            user_id: row.get("user_id"),
            scope: Self::str_to_scope(row.get("scope")),
            target: row.get("target"),
            patch: row.get("patch"),
            effective_from: row.get("effective_from"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl OverrideRepository for PgOverrideRepository {
    async fn insert(&self, req: NewUserOverride) -> Result<UserOverride> {
        let override_id = new_v7();
        let now = Utc::now();

        let row = sqlx::query(
            "INSERT INTO user_overrides
                 (id, user_id, scope, target, patch, effective_from, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, user_id, scope, target, patch, effective_from, created_at",
        )
        .bind(override_id)
        .bind(req.user_id)
        .bind(Self::scope_to_str(req.scope))
        .bind(&req.target)
        .bind(&req.patch)
        .bind(req.effective_from)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_override_row(row))
    }

    async fn list_effective(
        &self,
        user_id: Uuid,
        on_or_before: NaiveDate,
    ) -> Result<Vec<UserOverride>> {
        // Oldest first: applying in this order lets a later correction of
        // the same target win.
        let rows = sqlx::query(
            "SELECT id, user_id, scope, target, patch, effective_from, created_at
             FROM user_overrides
             WHERE user_id = $1 AND effective_from <= $2
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .bind(on_or_before)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_override_row).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM user_overrides WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("override {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_round_trips() {
        for scope in [OverrideScope::Transaction, OverrideScope::Metric] {
            assert_eq!(
                PgOverrideRepository::str_to_scope(PgOverrideRepository::scope_to_str(scope)),
                scope
            );
        }
    }

    #[test]
    fn test_unknown_scope_falls_back_to_transaction() {
        assert_eq!(
            PgOverrideRepository::str_to_scope("global"),
            OverrideScope::Transaction
        );
    }
}
