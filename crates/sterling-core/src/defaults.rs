//! Centralized default constants for the sterling pipeline.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates and the worker binary should reference these constants instead of
//! defining their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// QUEUES
// =============================================================================

/// Queue carrying document-processing triggers.
pub const QUEUE_DOCUMENT_PROCESSING: &str = "document-processing";

/// Queue carrying analytics rebuild triggers.
pub const QUEUE_ANALYTICS_REBUILD: &str = "analytics-rebuild";

/// Default queue poll interval in milliseconds.
///
/// Deliveries are at-least-once; the poll is the only wake-up mechanism, so
/// this bounds worst-case trigger latency.
pub const OUTBOX_POLL_INTERVAL_MS: u64 = 1_000;

/// Base delay unit for retry backoff in seconds.
pub const OUTBOX_BACKOFF_BASE_SECS: u64 = 1;

/// Ceiling for retry backoff in seconds.
///
/// Backoff is `min(cap, 2^attempts * base)`, so delays grow 1s, 2s, 4s ...
/// and flatten at one minute.
pub const OUTBOX_BACKOFF_CAP_SECS: u64 = 60;

/// Delivery attempts before an outbox job is marked failed for good.
///
/// Purely a poison-trigger guard. Document-level retry is bounded much
/// earlier by [`PIPELINE_MAX_ATTEMPTS`]; this cap only stops a trigger whose
/// payload can never be delivered from circulating forever.
pub const OUTBOX_MAX_ATTEMPTS: i32 = 25;

/// How long a claimed-but-unfinished job may sit before it is reclaimed,
/// in seconds. Covers worker crashes mid-claim.
pub const CLAIM_TIMEOUT_SECS: i64 = 900;

/// Interval between stale-claim reclaim sweeps in milliseconds.
pub const RECLAIM_INTERVAL_MS: u64 = 60_000;

// =============================================================================
// DOCUMENT PIPELINE
// =============================================================================

/// Default maximum processing attempts per document before dead-lettering.
pub const PIPELINE_MAX_ATTEMPTS: i32 = 5;

/// Minimum classifier confidence for a document to enter normalization.
pub const MIN_CLASSIFICATION_CONFIDENCE: f64 = 0.6;

/// Bytes of document content inspected for classification keywords.
pub const CLASSIFY_CONTENT_WINDOW: usize = 16 * 1024;

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Absolute tolerance for money comparisons after rounding to 2 dp.
pub const MONEY_TOLERANCE: f64 = 0.01;

/// Version stamp recorded on every insight this normalizer produces.
pub const PARSER_VERSION: &str = "2026.8";

/// Schema version assumed when the standardization payload does not carry one.
pub const DEFAULT_SCHEMA_VERSION: i32 = 1;

// =============================================================================
// STANDARDIZATION SERVICE
// =============================================================================

/// Default interval between standardization job status polls, in milliseconds.
pub const DOCUPIPE_POLL_INTERVAL_MS: u64 = 5_000;

/// Default overall polling deadline in seconds (10 minutes).
pub const DOCUPIPE_POLL_TIMEOUT_SECS: u64 = 600;

/// Timeout for the document submission request in seconds.
pub const DOCUPIPE_SUBMIT_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// ANALYTICS
// =============================================================================

/// Transaction category excluded from spend aggregation.
pub const CATEGORY_TRANSFERS: &str = "Transfers";

/// Transaction category carrying salary credits.
pub const CATEGORY_SALARY: &str = "Salary";

/// Inflow categories counted as income besides salary.
pub const OTHER_INCOME_CATEGORIES: [&str; 4] = ["Income", "Interest", "Dividends", "Refund"];

/// Fallback category for transactions the upstream extraction left untagged.
pub const CATEGORY_UNCATEGORIZED: &str = "Uncategorized";

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for list endpoints (jobs, insights, dead letters).
pub const PAGE_LIMIT: i64 = 50;

/// Internal "fetch everything" limit for aggregation queries.
pub const INTERNAL_FETCH_LIMIT: i64 = 10_000;
