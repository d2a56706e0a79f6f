//! Queue processors: the per-document pipeline run and the analytics
//! rebuild trigger.
//!
//! A document-processing delivery does not name a document; it is a nudge
//! to drain the pipeline table. The pipeline claim is the cross-process
//! mutual exclusion, so any number of triggers for any number of documents
//! is safe. Every failure funnels through one decision point: non-retryable
//! causes dead-letter the document immediately, retryable ones surface to
//! the outbox so backoff schedules the next attempt, and a retryable cause
//! on the final permitted attempt dead-letters under its own reason.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sterling_core::defaults::{
    DEFAULT_SCHEMA_VERSION, MIN_CLASSIFICATION_CONFIDENCE, PARSER_VERSION,
    QUEUE_ANALYTICS_REBUILD,
};
use sterling_core::pii::hash_bytes;
use sterling_core::{
    DeadLetterReason, DocumentInsight, DocumentKind, Error, InsightMetrics, IntegrityReason,
    Month, NewAccount, NewDeadLetter, NewDocumentInsight, OutboxJob, PipelineJob,
    PipelineJobStatus, Result, StatementMetrics, StepName, StepUpdate, Transaction,
};
use sterling_docupipe::{StandardizeStatus, Standardizer, Submission};

use crate::analytics::AnalyticsEngine;
use crate::canonical::{account_fingerprint, canonicalise_institution, plan_raw_name_append};
use crate::classifier::{self, Classification};
use crate::driver::QueueProcessor;
use crate::normalize;
use crate::service::Stores;

/// Runs claimed pipeline jobs through the document steps.
pub struct DocumentProcessor {
    stores: Stores,
    standardizer: Arc<dyn Standardizer>,
}

/// What one document run produced before indexing.
struct NormalizedDoc {
    metrics: InsightMetrics,
    transactions: Vec<Transaction>,
    document_date: Option<NaiveDate>,
    notes: Vec<String>,
}

impl DocumentProcessor {
    pub fn new(stores: Stores, standardizer: Arc<dyn Standardizer>) -> Self {
        Self {
            stores,
            standardizer,
        }
    }

    /// Run one claimed document to a terminal decision. `Err` means the
    /// run should be retried via outbox backoff; dead-lettered and
    /// completed documents both return `Ok`.
    async fn run_document(&self, job: &PipelineJob) -> Result<()> {
        match self.execute_steps(job).await {
            Ok(insight_id) => {
                self.stores
                    .pipeline
                    .finalize(job.id, PipelineJobStatus::Completed, None)
                    .await?;
                info!(document_id = %job.id, insight_id = %insight_id, "document completed");
                Ok(())
            }
            Err((step, err)) => self.handle_failure(job, step, err).await,
        }
    }

    async fn execute_steps(&self, job: &PipelineJob) -> StepResult<Uuid> {
        let (bytes, classification) = self
            .step_classify(job)
            .await
            .map_err(|e| (StepName::Classified, e))?;
        let (submission, payload) = self
            .step_standardize(job, &bytes)
            .await
            .map_err(|e| (StepName::Standardized, e))?;
        let normalized = self
            .step_post_process(job, classification.kind, &payload)
            .await
            .map_err(|e| (StepName::PostProcessed, e))?;
        let insight = self
            .step_index(job, &bytes, &classification, &submission, &payload, normalized)
            .await
            .map_err(|e| (StepName::Indexed, e))?;
        self.step_ready(job, &insight)
            .await
            .map_err(|e| (StepName::Ready, e))?;
        Ok(insight.id)
    }

    /// Classify from the original filename plus a text window of the bytes.
    async fn step_classify(&self, job: &PipelineJob) -> Result<(Vec<u8>, Classification)> {
        self.stores
            .pipeline
            .mark_step(job.id, StepName::Classified, StepUpdate::running())
            .await?;

        let bytes = self.stores.storage.read(&job.storage_key).await?;
        let window = classifier::content_window(&bytes);
        let classification = classifier::classify(&job.original_name, Some(&window));
        debug!(
            document_id = %job.id,
            kind = classification.kind.as_str(),
            confidence = classification.confidence,
            "classified"
        );

        if classification.kind == DocumentKind::Unknown
            || classification.confidence < MIN_CLASSIFICATION_CONFIDENCE
        {
            return Err(Error::Classification(format!(
                "{} at confidence {:.2}",
                classification.kind.as_str(),
                classification.confidence
            )));
        }

        self.stores
            .pipeline
            .mark_step(
                job.id,
                StepName::Classified,
                StepUpdate::completed_with(format!(
                    "{} ({:.2})",
                    classification.kind.as_str(),
                    classification.confidence
                )),
            )
            .await?;
        Ok((bytes, classification))
    }

    /// Submit, poll to terminal, fetch. A failed standardization job comes
    /// back as `Ok(Failed)` from the client and is converted to a
    /// retryable error here.
    async fn step_standardize(
        &self,
        job: &PipelineJob,
        bytes: &[u8],
    ) -> Result<(Submission, JsonValue)> {
        self.stores
            .pipeline
            .mark_step(job.id, StepName::Standardized, StepUpdate::running())
            .await?;

        let submission = self
            .standardizer
            .submit(bytes, &job.original_name, None)
            .await?;
        match self.standardizer.poll(&submission.job_id).await? {
            StandardizeStatus::Completed => {}
            StandardizeStatus::Failed { error } => return Err(Error::Docupipe(error)),
        }
        let payload = self
            .standardizer
            .fetch_standardization(&submission.document_id)
            .await?;

        self.stores
            .pipeline
            .mark_step(
                job.id,
                StepName::Standardized,
                StepUpdate::completed_with(format!("document {}", submission.document_id)),
            )
            .await?;
        Ok((submission, payload))
    }

    /// Normalize and enforce the integrity invariant. A failing report
    /// becomes an error so nothing from this document is ever persisted.
    async fn step_post_process(
        &self,
        job: &PipelineJob,
        kind: DocumentKind,
        payload: &JsonValue,
    ) -> Result<NormalizedDoc> {
        self.stores
            .pipeline
            .mark_step(job.id, StepName::PostProcessed, StepUpdate::running())
            .await?;

        let normalized = normalize_document(kind, payload)?;
        if let Some((reason, delta)) = integrity_failure(&normalized.metrics) {
            return Err(Error::Integrity { reason, delta });
        }

        self.stores
            .pipeline
            .mark_step(job.id, StepName::PostProcessed, StepUpdate::completed())
            .await?;
        Ok(normalized)
    }

    /// Persist the canonical insight and upsert the account it evidences.
    #[allow(clippy::too_many_arguments)]
    async fn step_index(
        &self,
        job: &PipelineJob,
        bytes: &[u8],
        classification: &Classification,
        submission: &Submission,
        payload: &JsonValue,
        normalized: NormalizedDoc,
    ) -> Result<DocumentInsight> {
        self.stores
            .pipeline
            .mark_step(job.id, StepName::Indexed, StepUpdate::running())
            .await?;

        let mut notes = normalized.notes;
        let document_month = match normalized.document_date {
            Some(date) => Month::from_date(date),
            None => {
                notes.push("document date missing; month taken from upload time".to_string());
                Month::from_date(job.created_at.date_naive())
            }
        };

        let schema_version = payload
            .get("schemaVersion")
            .and_then(JsonValue::as_i64)
            .map(|v| v as i32)
            .unwrap_or(DEFAULT_SCHEMA_VERSION);
        let prompt_version = payload
            .get("promptVersion")
            .and_then(JsonValue::as_str)
            .map(String::from);
        let model_version = payload
            .get("modelVersion")
            .and_then(JsonValue::as_str)
            .map(String::from);

        let metadata = json!({
            "original_name": job.original_name,
            "classification": {
                "kind": classification.kind.as_str(),
                "confidence": classification.confidence,
                "employer": classification.employer_name,
                "institution": classification.institution_name,
            },
            "docupipe": {
                "document_id": submission.document_id,
                "job_id": submission.job_id,
            },
        });

        let insight = self
            .stores
            .insights
            .insert(NewDocumentInsight {
                user_id: job.user_id,
                file_id: job.file_id,
                catalogue_key: classification.kind,
                schema_version,
                parser_version: PARSER_VERSION.to_string(),
                prompt_version,
                model_version,
                confidence: classification.confidence,
                content_hash: hash_bytes(bytes),
                document_date: normalized.document_date,
                document_month,
                metrics: normalized.metrics,
                transactions: normalized.transactions,
                metadata,
                notes,
            })
            .await?;

        if let InsightMetrics::Statement(metrics) = &insight.metrics {
            self.index_account(job.user_id, insight.catalogue_key, metrics)
                .await?;
        }

        self.stores
            .pipeline
            .mark_step(
                job.id,
                StepName::Indexed,
                StepUpdate::completed_with(format!("insight {}", insight.id)),
            )
            .await?;
        Ok(insight)
    }

    /// Upsert the account this statement evidences and append any new raw
    /// spelling of its institution.
    async fn index_account(
        &self,
        user_id: Uuid,
        kind: DocumentKind,
        metrics: &StatementMetrics,
    ) -> Result<()> {
        let Some(raw_name) = metrics.institution.as_deref() else {
            return Ok(());
        };
        let canonical = canonicalise_institution(raw_name);
        let fingerprint =
            account_fingerprint(&canonical.canonical, metrics.account_number_hash.as_deref());

        let account = self
            .stores
            .accounts
            .upsert(NewAccount {
                user_id,
                institution: canonical.canonical.clone(),
                raw_institution_name: canonical.raw.clone(),
                account_type: kind,
                account_number_hash: metrics.account_number_hash.clone(),
                account_number_masked: metrics.account_number_masked.clone(),
                fingerprint,
            })
            .await?;

        let plan = plan_raw_name_append(&account.raw_institution_names, &canonical.raw)?;
        if !plan.is_empty() {
            self.stores.accounts.apply_update(account.id, &plan).await?;
        }
        Ok(())
    }

    /// Queue the analytics rebuild for the affected month and complete the
    /// run. The trigger is deduplicated per `(user, month)`, so a burst of
    /// documents for one month rebuilds once.
    async fn step_ready(&self, job: &PipelineJob, insight: &DocumentInsight) -> Result<()> {
        self.stores
            .pipeline
            .mark_step(job.id, StepName::Ready, StepUpdate::running())
            .await?;

        let month = insight.document_month;
        let dedupe_key = format!("{}:{}", job.user_id, month);
        let queued = self
            .stores
            .outbox
            .enqueue_deduplicated(
                QUEUE_ANALYTICS_REBUILD,
                json!({ "user_id": job.user_id, "month": month.to_string() }),
                &dedupe_key,
            )
            .await?;
        match queued {
            Some(trigger_id) => {
                debug!(document_id = %job.id, %trigger_id, month = %month, "analytics rebuild queued")
            }
            None => debug!(document_id = %job.id, month = %month, "analytics rebuild already queued"),
        }

        self.stores
            .pipeline
            .mark_step(job.id, StepName::Ready, StepUpdate::completed())
            .await?;
        Ok(())
    }

    /// The single failure decision point.
    async fn handle_failure(&self, job: &PipelineJob, step: StepName, err: Error) -> Result<()> {
        let message = err.to_string();
        self.stores
            .pipeline
            .fail_remaining_steps(job.id, step, &message)
            .await?;

        match dead_letter_reason(&err, job.attempts, job.max_attempts) {
            Some(reason) => {
                self.stores
                    .pipeline
                    .finalize(job.id, PipelineJobStatus::DeadLetter, Some(&message))
                    .await?;
                let details = dead_letter_details(&err);
                self.stores
                    .dead_letters
                    .record(NewDeadLetter {
                        user_id: job.user_id,
                        file_id: job.file_id,
                        reason,
                        details: Some(details),
                    })
                    .await?;
                warn!(
                    document_id = %job.id,
                    step = ?step,
                    reason = reason.as_str(),
                    "document dead-lettered"
                );
                Ok(())
            }
            None => {
                self.stores
                    .pipeline
                    .finalize(job.id, PipelineJobStatus::Failed, Some(&message))
                    .await?;
                warn!(
                    document_id = %job.id,
                    step = ?step,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    error = %message,
                    "document failed; will retry"
                );
                Err(err)
            }
        }
    }
}

type StepResult<T> = std::result::Result<T, (StepName, Error)>;

#[async_trait]
impl QueueProcessor for DocumentProcessor {
    async fn process(&self, _job: &OutboxJob) -> Result<()> {
        // Every document gets one attempt per delivery. A retryably-failed
        // job goes back to claimable immediately, so without the exclusion
        // list the drain would spin on it until its attempts ran out.
        let mut first_retryable: Option<Error> = None;
        let mut drained: Vec<Uuid> = Vec::new();
        while let Some(job) = self.stores.pipeline.claim(&drained).await? {
            drained.push(job.id);
            info!(
                document_id = %job.id,
                attempt = job.attempts,
                name = %job.original_name,
                "processing document"
            );
            if let Err(err) = self.run_document(&job).await {
                first_retryable.get_or_insert(err);
            }
        }
        match first_retryable {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Route a run error: `Some(reason)` dead-letters the document now, `None`
/// leaves it retryable. `attempts` is the attempt that just ran.
fn dead_letter_reason(err: &Error, attempts: i32, max_attempts: i32) -> Option<DeadLetterReason> {
    match err {
        Error::Classification(_) => Some(DeadLetterReason::UnsupportedOrLowConfidence),
        Error::Integrity { reason, .. } => Some((*reason).into()),
        Error::Docupipe(_) if attempts >= max_attempts => Some(DeadLetterReason::DocupipeError),
        Error::DocupipeTimeout(_) if attempts >= max_attempts => {
            Some(DeadLetterReason::DocupipeTimeout)
        }
        _ if attempts >= max_attempts => Some(DeadLetterReason::AttemptsExhausted),
        _ => None,
    }
}

fn dead_letter_details(err: &Error) -> String {
    match err {
        Error::Integrity {
            reason,
            delta: Some(delta),
        } => format!("{reason}; delta {delta:+.2}"),
        Error::Integrity {
            reason,
            delta: None,
        } => reason.to_string(),
        other => other.to_string(),
    }
}

fn normalize_document(kind: DocumentKind, payload: &JsonValue) -> Result<NormalizedDoc> {
    match kind {
        DocumentKind::Payslip => {
            let n = normalize::normalize_payslip(payload)?;
            let document_date = n.metrics.pay_date;
            Ok(NormalizedDoc {
                metrics: InsightMetrics::Payslip(n.metrics),
                transactions: Vec::new(),
                document_date,
                notes: n.notes,
            })
        }
        DocumentKind::CurrentAccountStatement
        | DocumentKind::SavingsAccountStatement
        | DocumentKind::IsaStatement
        | DocumentKind::InvestmentStatement
        | DocumentKind::PensionStatement => {
            let n = normalize::normalize_statement(payload);
            Ok(NormalizedDoc {
                metrics: InsightMetrics::Statement(n.metrics),
                transactions: n.transactions,
                document_date: n.period_end,
                notes: n.notes,
            })
        }
        DocumentKind::HmrcCorrespondence => Ok(NormalizedDoc {
            metrics: InsightMetrics::None,
            transactions: Vec::new(),
            document_date: normalize::document_date(payload),
            notes: Vec::new(),
        }),
        // Unreachable behind the classification gate, but the type allows it.
        DocumentKind::Unknown => Err(Error::Classification("unknown document kind".to_string())),
    }
}

fn integrity_failure(metrics: &InsightMetrics) -> Option<(IntegrityReason, Option<f64>)> {
    let report = match metrics {
        InsightMetrics::Payslip(m) => &m.integrity,
        InsightMetrics::Statement(m) => &m.integrity,
        InsightMetrics::None => return None,
    };
    if report.passed() {
        None
    } else {
        report.reason.map(|reason| (reason, report.delta))
    }
}

/// Rebuilds the snapshot named by an analytics trigger payload.
pub struct AnalyticsProcessor {
    engine: Arc<AnalyticsEngine>,
}

#[derive(Debug, Deserialize)]
struct RebuildTrigger {
    user_id: Uuid,
    month: Month,
}

impl AnalyticsProcessor {
    pub fn new(engine: Arc<AnalyticsEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl QueueProcessor for AnalyticsProcessor {
    async fn process(&self, job: &OutboxJob) -> Result<()> {
        let trigger: RebuildTrigger = serde_json::from_value(job.payload.clone())?;
        self.engine
            .rebuild_monthly(trigger.user_id, trigger.month)
            .await?;
        Ok(())
    }
}
