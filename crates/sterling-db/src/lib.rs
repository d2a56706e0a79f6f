//! # sterling-db
//!
//! PostgreSQL persistence layer for the sterling document pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - The durable outbox queue (`FOR UPDATE SKIP LOCKED` claims)
//! - Pipeline job storage with the per-document step ladder
//! - Insight, account, override, snapshot, and dead-letter repositories
//! - A filesystem object store for uploaded documents
//!
//! ## Example
//!
//! ```rust,ignore
//! use sterling_db::Database;
//! use sterling_core::OutboxRepository;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/sterling").await?;
//!
//!     let job_id = db
//!         .outbox
//!         .enqueue("document-processing", serde_json::json!({"document_id": "..."}))
//!         .await?;
//!
//!     println!("Enqueued trigger: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod dead_letters;
pub mod insights;
pub mod object_store;
pub mod outbox;
pub mod overrides;
pub mod pipeline_jobs;
pub mod pool;
pub mod snapshots;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use sterling_core::*;

// Re-export repository implementations
pub use accounts::PgAccountRepository;
pub use dead_letters::PgDeadLetterRepository;
pub use insights::PgInsightRepository;
pub use object_store::{document_storage_key, FilesystemStore};
pub use outbox::PgOutboxRepository;
pub use overrides::PgOverrideRepository;
pub use pipeline_jobs::PgPipelineJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use snapshots::PgSnapshotRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Durable trigger queue.
    pub outbox: PgOutboxRepository,
    /// Per-document pipeline state machine storage.
    pub pipeline_jobs: PgPipelineJobRepository,
    /// Canonical insight repository.
    pub insights: PgInsightRepository,
    /// Account registry keyed by fingerprint.
    pub accounts: PgAccountRepository,
    /// User override repository.
    pub overrides: PgOverrideRepository,
    /// Monthly analytics snapshot repository.
    pub snapshots: PgSnapshotRepository,
    /// Dead letter repository.
    pub dead_letters: PgDeadLetterRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            outbox: PgOutboxRepository::new(pool.clone()),
            pipeline_jobs: PgPipelineJobRepository::new(pool.clone()),
            insights: PgInsightRepository::new(pool.clone()),
            accounts: PgAccountRepository::new(pool.clone()),
            overrides: PgOverrideRepository::new(pool.clone()),
            snapshots: PgSnapshotRepository::new(pool.clone()),
            dead_letters: PgDeadLetterRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
