//! Core data models for the sterling document pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Months
// ============================================================================

/// A calendar month in `YYYY-MM` form.
///
/// The grouping key for insights and analytics snapshots. Construction
/// validates the calendar month, so a `Month` in hand is always well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1900..=2999).contains(&year) {
            return Err(Error::InvalidInput(format!(
                "invalid month: {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }

    /// The month a date falls in. Infallible: any valid date has one.
    pub fn from_date(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First calendar day of the month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day of the month. Overrides effective on or before this
    /// date apply to the month's snapshot.
    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidInput(format!("invalid month: {s:?}")))?;
        if y.len() != 4 || m.len() != 2 {
            return Err(Error::InvalidInput(format!("invalid month: {s:?}")));
        }
        let year: i32 = y
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid month: {s:?}")))?;
        let month: u32 = m
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid month: {s:?}")))?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for Month {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Month> for String {
    fn from(m: Month) -> Self {
        m.to_string()
    }
}

// ============================================================================
// Document catalogue
// ============================================================================

/// Catalogue key: the supported document type universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Payslip,
    CurrentAccountStatement,
    SavingsAccountStatement,
    IsaStatement,
    InvestmentStatement,
    PensionStatement,
    HmrcCorrespondence,
    Unknown,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Payslip => "payslip",
            DocumentKind::CurrentAccountStatement => "current_account_statement",
            DocumentKind::SavingsAccountStatement => "savings_account_statement",
            DocumentKind::IsaStatement => "isa_statement",
            DocumentKind::InvestmentStatement => "investment_statement",
            DocumentKind::PensionStatement => "pension_statement",
            DocumentKind::HmrcCorrespondence => "hmrc_correspondence",
            DocumentKind::Unknown => "unknown",
        }
    }

    /// Parse a catalogue key string; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "payslip" => DocumentKind::Payslip,
            "current_account_statement" => DocumentKind::CurrentAccountStatement,
            "savings_account_statement" => DocumentKind::SavingsAccountStatement,
            "isa_statement" => DocumentKind::IsaStatement,
            "investment_statement" => DocumentKind::InvestmentStatement,
            "pension_statement" => DocumentKind::PensionStatement,
            "hmrc_correspondence" => DocumentKind::HmrcCorrespondence,
            _ => DocumentKind::Unknown,
        }
    }

    /// Statement kinds run the statement normalizer; payslips run the
    /// payslip normalizer; HMRC correspondence carries no numeric metrics.
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            DocumentKind::CurrentAccountStatement
                | DocumentKind::SavingsAccountStatement
                | DocumentKind::IsaStatement
                | DocumentKind::InvestmentStatement
                | DocumentKind::PensionStatement
        )
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Outbox queue
// ============================================================================

/// Delivery state of an outbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxJobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A durably queued trigger. Jobs are retained after completion for audit;
/// only the claiming worker mutates a job once it leaves `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: Uuid,
    pub queue: String,
    pub payload: JsonValue,
    pub state: OutboxJobState,
    pub attempts: i32,
    /// Not claimable before this instant; pushed out by retry backoff.
    pub available_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-queue delivery counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxQueueStats {
    pub queue: String,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

// ============================================================================
// Pipeline jobs
// ============================================================================

/// Overall status of a per-document pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl PipelineJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineJobStatus::Completed | PipelineJobStatus::DeadLetter
        )
    }
}

/// Status of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// The fixed, ordered step ladder every document moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Uploaded,
    Queued,
    Classified,
    Standardized,
    PostProcessed,
    Indexed,
    Ready,
}

impl StepName {
    /// All steps in pipeline order.
    pub const ORDERED: [StepName; 7] = [
        StepName::Uploaded,
        StepName::Queued,
        StepName::Classified,
        StepName::Standardized,
        StepName::PostProcessed,
        StepName::Indexed,
        StepName::Ready,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Uploaded => "uploaded",
            StepName::Queued => "queued",
            StepName::Classified => "classified",
            StepName::Standardized => "standardized",
            StepName::PostProcessed => "post_processed",
            StepName::Indexed => "indexed",
            StepName::Ready => "ready",
        }
    }

    /// Zero-based position in the ladder.
    pub fn position(&self) -> usize {
        StepName::ORDERED
            .iter()
            .position(|s| s == self)
            .unwrap_or(0)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step's progress record, stored inside the job's `steps` JSONB column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: StepName,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PipelineStep {
    pub fn pending(name: StepName) -> Self {
        Self {
            name,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            message: None,
        }
    }

    fn completed(name: StepName, at: DateTime<Utc>) -> Self {
        Self {
            name,
            status: StepStatus::Completed,
            started_at: Some(at),
            ended_at: Some(at),
            message: None,
        }
    }
}

/// The step vector a freshly enqueued document starts with: upload and
/// queueing have already happened by the time the row exists.
pub fn initial_steps(now: DateTime<Utc>) -> Vec<PipelineStep> {
    StepName::ORDERED
        .iter()
        .map(|name| match name {
            StepName::Uploaded | StepName::Queued => PipelineStep::completed(*name, now),
            _ => PipelineStep::pending(*name),
        })
        .collect()
}

/// One document's journey through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub original_name: String,
    pub collection_id: Option<Uuid>,
    pub display_name: Option<String>,
    /// Object-store key holding the raw document bytes.
    pub storage_key: String,
    pub status: PipelineJobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub steps: Vec<PipelineStep>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineJob {
    pub fn step(&self, name: StepName) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Exposed view of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub document_id: Uuid,
    pub status: PipelineJobStatus,
    pub attempts: i32,
    pub steps: Vec<PipelineStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<PipelineJob> for PipelineStatus {
    fn from(job: PipelineJob) -> Self {
        Self {
            document_id: job.id,
            status: job.status,
            attempts: job.attempts,
            steps: job.steps,
            last_error: job.last_error,
        }
    }
}

// ============================================================================
// Integrity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Pass,
    Fail,
}

/// Why an integrity cross-check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityReason {
    NetIdentityFailed,
    BalanceMismatch,
}

impl IntegrityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityReason::NetIdentityFailed => "net_identity_failed",
            IntegrityReason::BalanceMismatch => "balance_mismatch",
        }
    }
}

impl std::fmt::Display for IntegrityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a normalizer cross-check, recorded on the insight whether it
/// passed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IntegrityReason>,
    /// Signed residual: observed minus expected. Absent when the check could
    /// not be computed at all (e.g. a balance was missing).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl IntegrityReport {
    pub fn pass() -> Self {
        Self {
            status: IntegrityStatus::Pass,
            reason: None,
            delta: None,
        }
    }

    pub fn fail(reason: IntegrityReason, delta: Option<f64>) -> Self {
        Self {
            status: IntegrityStatus::Fail,
            reason: Some(reason),
            delta,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == IntegrityStatus::Pass
    }
}

// ============================================================================
// Insights
// ============================================================================

/// Whether `other_deductions` came from the document or was derived from the
/// gross/net residual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeductionSource {
    Provided,
    Computed,
}

/// Typed metrics extracted from a payslip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayslipMetrics {
    pub employer: Option<String>,
    pub pay_date: Option<NaiveDate>,
    pub gross: f64,
    pub net: f64,
    pub income_tax: f64,
    pub national_insurance: f64,
    pub pension: f64,
    pub student_loan: f64,
    pub other_deductions: f64,
    pub other_deductions_source: DeductionSource,
    /// Gross minus every deduction; the value `net` is checked against.
    pub expected_net: f64,
    pub ni_number_hash: Option<String>,
    pub ni_number_masked: Option<String>,
    pub integrity: IntegrityReport,
}

/// Typed metrics extracted from an account statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementMetrics {
    pub institution: Option<String>,
    pub account_number_hash: Option<String>,
    pub account_number_masked: Option<String>,
    pub sort_code_masked: Option<String>,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
    pub inflow: f64,
    pub outflow: f64,
    /// `opening + inflow - outflow`; absent when either balance is missing.
    pub expected_closing: Option<f64>,
    pub integrity: IntegrityReport,
}

/// Per-kind metrics union. The aggregator matches on this, so adding a kind
/// forces every consumer to decide what it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightMetrics {
    Payslip(PayslipMetrics),
    Statement(StatementMetrics),
    /// Correspondence and other non-numeric documents.
    None,
}

/// Direction of a statement transaction relative to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
    In,
    Out,
}

/// A single statement transaction. `amount` is always non-negative; the
/// sign lives in `direction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub description: String,
    pub amount: f64,
    pub direction: TxDirection,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<f64>,
}

/// The canonical, verified record extracted from one document.
///
/// Immutable once written: a changed extraction schema inserts a new row
/// under a new `schema_version` rather than touching this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInsight {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub catalogue_key: DocumentKind,
    pub schema_version: i32,
    pub parser_version: String,
    pub prompt_version: Option<String>,
    pub model_version: Option<String>,
    pub confidence: f64,
    pub content_hash: String,
    pub document_date: Option<NaiveDate>,
    pub document_month: Month,
    pub metrics: InsightMetrics,
    pub transactions: Vec<Transaction>,
    pub metadata: JsonValue,
    /// Normalization notes, e.g. which alias supplied a field or that a
    /// deduction was derived rather than read.
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Accounts
// ============================================================================

/// A deduplicated financial account derived from statement insights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Canonical institution name.
    pub institution: String,
    /// Every raw spelling ever seen for this institution. Grows via
    /// validated append-unique plans only.
    pub raw_institution_names: Vec<String>,
    pub account_type: DocumentKind,
    pub account_number_hash: Option<String>,
    pub account_number_masked: Option<String>,
    /// Dedup key: hash of canonical institution plus account number hash.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Overrides
// ============================================================================

/// What a user override targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideScope {
    /// `target` is a transaction id; `patch` merges into that transaction
    /// before aggregation.
    Transaction,
    /// `target` is a dotted path into the snapshot figures; `patch` is the
    /// replacement value, applied after aggregation.
    Metric,
}

/// A user correction layered over derived data at aggregation time.
/// Underlying insights are never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOverride {
    pub id: Uuid,
    pub user_id: Uuid,
    pub scope: OverrideScope,
    pub target: String,
    pub patch: JsonValue,
    pub effective_from: NaiveDate,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Analytics snapshots
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeSummary {
    pub gross: f64,
    pub net: f64,
    /// Non-payslip income observed in statement inflows.
    pub other: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxSummary {
    pub income_tax: f64,
    pub national_insurance: f64,
    pub pension: f64,
    pub student_loan: f64,
    pub total_withheld: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashflowSummary {
    pub inflow: f64,
    pub outflow: f64,
    pub net: f64,
}

/// The typed figures document a rebuild produces; serialized to JSON before
/// metric overrides patch it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFigures {
    pub income: IncomeSummary,
    pub tax: TaxSummary,
    pub cashflow: CashflowSummary,
    /// Outflow totals per category; `Transfers` is never a key here.
    pub spend_by_category: BTreeMap<String, f64>,
    pub total_spend: f64,
    pub savings_balance: Option<f64>,
    pub isa_balance: Option<f64>,
    pub investment_balance: Option<f64>,
    pub pension_balance: Option<f64>,
}

/// One user's aggregated view of one month. Fully derived; replaced
/// wholesale on every rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnalyticsSnapshot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub month: Month,
    /// Figures document with metric overrides already applied.
    pub figures: JsonValue,
    pub insight_count: i32,
    pub transaction_count: i32,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Dead letters
// ============================================================================

/// Why a document was taken out of the pipeline for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    UnsupportedOrLowConfidence,
    NetIdentityFailed,
    BalanceMismatch,
    DocupipeError,
    DocupipeTimeout,
    AttemptsExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::UnsupportedOrLowConfidence => "unsupported_or_low_confidence",
            DeadLetterReason::NetIdentityFailed => "net_identity_failed",
            DeadLetterReason::BalanceMismatch => "balance_mismatch",
            DeadLetterReason::DocupipeError => "docupipe_error",
            DeadLetterReason::DocupipeTimeout => "docupipe_timeout",
            DeadLetterReason::AttemptsExhausted => "attempts_exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unsupported_or_low_confidence" => Some(DeadLetterReason::UnsupportedOrLowConfidence),
            "net_identity_failed" => Some(DeadLetterReason::NetIdentityFailed),
            "balance_mismatch" => Some(DeadLetterReason::BalanceMismatch),
            "docupipe_error" => Some(DeadLetterReason::DocupipeError),
            "docupipe_timeout" => Some(DeadLetterReason::DocupipeTimeout),
            "attempts_exhausted" => Some(DeadLetterReason::AttemptsExhausted),
            _ => None,
        }
    }
}

impl From<IntegrityReason> for DeadLetterReason {
    fn from(reason: IntegrityReason) -> Self {
        match reason {
            IntegrityReason::NetIdentityFailed => DeadLetterReason::NetIdentityFailed,
            IntegrityReason::BalanceMismatch => DeadLetterReason::BalanceMismatch,
        }
    }
}

/// A document that will not be retried, kept queryable for support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_id: Uuid,
    pub reason: DeadLetterReason,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
