//! Document service: the construction seam between storage, repositories
//! and the pipeline.
//!
//! Everything the processors and the API boundary need is reached through
//! [`Stores`]; the service owns no state of its own and every method is
//! safe to call from concurrent tasks.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use sterling_core::defaults::{PAGE_LIMIT, QUEUE_ANALYTICS_REBUILD, QUEUE_DOCUMENT_PROCESSING};
use sterling_core::{
    Account, AccountRepository, DeadLetterEntry, DeadLetterRepository, DocumentInsight, Error,
    InsightRepository, Month, NewPipelineJob, NewUserOverride, OutboxRepository,
    OverrideRepository, PipelineJobRepository, PipelineJobStatus, PipelineStatus, Result,
    SnapshotRepository, StorageBackend, UserAnalyticsSnapshot, UserOverride,
};
use sterling_db::object_store::document_storage_key;

/// The shared handles one worker process wires up once and clones freely.
#[derive(Clone)]
pub struct Stores {
    pub outbox: Arc<dyn OutboxRepository>,
    pub pipeline: Arc<dyn PipelineJobRepository>,
    pub insights: Arc<dyn InsightRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub overrides: Arc<dyn OverrideRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub dead_letters: Arc<dyn DeadLetterRepository>,
    pub storage: Arc<dyn StorageBackend>,
}

/// Parameters for admitting an uploaded document into the pipeline.
#[derive(Debug, Clone)]
pub struct EnqueueDocumentRequest {
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub original_name: String,
    pub collection_id: Option<Uuid>,
    pub display_name: Option<String>,
}

/// Entry points the API boundary calls into the pipeline.
pub struct DocumentService {
    stores: Stores,
}

impl DocumentService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Storage key the upload path must have written the document under.
    pub fn storage_key(user_id: Uuid, file_id: Uuid) -> String {
        document_storage_key(&user_id, &file_id)
    }

    /// Admit an uploaded document: create its pipeline job and durably
    /// queue the processing trigger. Returns the document (pipeline job)
    /// id.
    ///
    /// Re-admitting the same file is idempotent while its latest job is
    /// live or completed; only a dead-lettered document gets a fresh job.
    pub async fn enqueue_document_job(&self, req: EnqueueDocumentRequest) -> Result<Uuid> {
        let original_name = req.original_name.trim();
        if original_name.is_empty() {
            return Err(Error::InvalidInput("original_name is empty".to_string()));
        }

        let storage_key = Self::storage_key(req.user_id, req.file_id);
        if !self.stores.storage.exists(&storage_key).await? {
            return Err(Error::InvalidInput(format!(
                "no stored object for file {}",
                req.file_id
            )));
        }

        if let Some(existing) = self
            .stores
            .pipeline
            .get_by_file(req.user_id, req.file_id)
            .await?
        {
            if existing.status != PipelineJobStatus::DeadLetter {
                debug!(document_id = %existing.id, status = ?existing.status, "file already admitted");
                self.trigger_document_processing(existing.id).await?;
                return Ok(existing.id);
            }
        }

        let document_id = self
            .stores
            .pipeline
            .create(NewPipelineJob {
                user_id: req.user_id,
                file_id: req.file_id,
                original_name: original_name.to_string(),
                collection_id: req.collection_id,
                display_name: req.display_name,
                storage_key,
                max_attempts: None,
            })
            .await?;
        self.trigger_document_processing(document_id).await?;

        info!(
            document_id = %document_id,
            user_id = %req.user_id,
            name = %original_name,
            "document admitted"
        );
        Ok(document_id)
    }

    /// One pending trigger per document; redundant admits collapse.
    async fn trigger_document_processing(&self, document_id: Uuid) -> Result<()> {
        self.stores
            .outbox
            .enqueue_deduplicated(
                QUEUE_DOCUMENT_PROCESSING,
                json!({ "document_id": document_id }),
                &format!("document:{}", document_id),
            )
            .await?;
        Ok(())
    }

    /// Step-by-step progress for one document.
    pub async fn pipeline_status(&self, document_id: Uuid) -> Result<PipelineStatus> {
        let job = self.stores.pipeline.get(document_id).await?;
        Ok(job.into())
    }

    /// Progress for the latest job admitted for an uploaded file.
    pub async fn pipeline_status_by_file(
        &self,
        user_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<PipelineStatus>> {
        let job = self.stores.pipeline.get_by_file(user_id, file_id).await?;
        Ok(job.map(Into::into))
    }

    /// The rebuilt snapshot for a month, if one has been generated.
    pub async fn monthly_snapshot(
        &self,
        user_id: Uuid,
        month: Month,
    ) -> Result<Option<UserAnalyticsSnapshot>> {
        self.stores.snapshots.get(user_id, month).await
    }

    /// Queue a rebuild for `(user, month)`, deduplicated against any
    /// rebuild already waiting for the same pair. Returns the trigger id
    /// when one was queued.
    pub async fn trigger_analytics_rebuild(
        &self,
        user_id: Uuid,
        month: Month,
    ) -> Result<Option<Uuid>> {
        self.stores
            .outbox
            .enqueue_deduplicated(
                QUEUE_ANALYTICS_REBUILD,
                json!({ "user_id": user_id, "month": month.to_string() }),
                &format!("{}:{}", user_id, month),
            )
            .await
    }

    /// Record a user correction and queue a rebuild of the month it first
    /// affects. Later months pick the override up on their next rebuild.
    pub async fn record_override(&self, req: NewUserOverride) -> Result<UserOverride> {
        let recorded = self.stores.overrides.insert(req).await?;
        self.trigger_analytics_rebuild(recorded.user_id, Month::from_date(recorded.effective_from))
            .await?;
        Ok(recorded)
    }

    /// Recent dead letters, optionally scoped to one user.
    pub async fn list_dead_letters(
        &self,
        user_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Vec<DeadLetterEntry>> {
        let limit = limit.unwrap_or(PAGE_LIMIT).clamp(1, PAGE_LIMIT);
        self.stores.dead_letters.list(user_id, limit).await
    }

    /// Accounts derived from this user's statements.
    pub async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<Account>> {
        self.stores.accounts.list_for_user(user_id).await
    }

    /// Most recent insights for a user.
    pub async fn recent_insights(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<DocumentInsight>> {
        let limit = limit.unwrap_or(PAGE_LIMIT).clamp(1, PAGE_LIMIT);
        self.stores.insights.list_for_user(user_id, limit).await
    }
}
