//! Account repository implementation.
//!
//! Accounts are deduplicated by fingerprint. Array columns are only ever
//! written through a validated [`UpdatePlan`], so conflicting operator
//! families are rejected before any row is touched.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sterling_core::{
    new_v7, Account, AccountRepository, DocumentKind, Error, NewAccount, Result, UpdatePlan,
};

/// PostgreSQL implementation of AccountRepository.
pub struct PgAccountRepository {
    pool: Pool<Postgres>,
}

impl PgAccountRepository {
    /// Create a new PgAccountRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse an account row into an Account struct.
    fn parse_account_row(row: sqlx::postgres::PgRow) -> Account {
        Account {
            id: row.get("id"),
            user_id: row.get("user_id"),
            institution: row.get("institution"),
            raw_institution_names: row.get("raw_institution_names"),
            account_type: DocumentKind::parse(row.get("account_type")),
            account_number_hash: row.get("account_number_hash"),
            account_number_masked: row.get("account_number_masked"),
            fingerprint: row.get("fingerprint"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    const COLUMNS: &'static str = "id, user_id, institution, raw_institution_names, \
         account_type, account_number_hash, account_number_masked, fingerprint, \
         created_at, updated_at";
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn upsert(&self, req: NewAccount) -> Result<Account> {
        let account_id = new_v7();
        let now = Utc::now();
        let raw_names = vec![req.raw_institution_name.clone()];

        // First writer wins; a fingerprint collision returns the existing
        // account untouched. Name variants are merged later through
        // apply_update, never here.
        let query = format!(
            "INSERT INTO accounts
                 (id, user_id, institution, raw_institution_names, account_type,
                  account_number_hash, account_number_masked, fingerprint, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             ON CONFLICT (user_id, fingerprint) DO NOTHING
             RETURNING {}",
            Self::COLUMNS
        );

        let inserted = sqlx::query(&query)
            .bind(account_id)
            .bind(req.user_id)
            .bind(&req.institution)
            .bind(&raw_names)
            .bind(req.account_type.as_str())
            .bind(&req.account_number_hash)
            .bind(&req.account_number_masked)
            .bind(&req.fingerprint)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        if let Some(row) = inserted {
            return Ok(Self::parse_account_row(row));
        }

        let query = format!(
            "SELECT {} FROM accounts WHERE user_id = $1 AND fingerprint = $2",
            Self::COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(req.user_id)
            .bind(&req.fingerprint)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Self::parse_account_row(row))
    }

    async fn apply_update(&self, account_id: Uuid, plan: &UpdatePlan) -> Result<Account> {
        plan.validate()?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let query = format!("SELECT {} FROM accounts WHERE id = $1", Self::COLUMNS);
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let Some(row) = row else {
            return Err(Error::NotFound(format!("account {account_id}")));
        };
        let mut account = Self::parse_account_row(row);

        if plan.is_empty() {
            return Ok(account);
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
                    )));
                }
            }
        }

        sqlx::query(
            "UPDATE accounts SET raw_institution_names = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(&account.raw_institution_names)
        .bind(now)
        .bind(account_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        account.updated_at = now;
        Ok(account)
    }

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Account>> {
        let query = format!(
            "SELECT {} FROM accounts WHERE user_id = $1 AND fingerprint = $2",
            Self::COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_account_row))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let query = format!(
            "SELECT {} FROM accounts WHERE user_id = $1 ORDER BY institution ASC, id ASC",
            Self::COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_account_row).collect())
    }
}
