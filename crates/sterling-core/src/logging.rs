//! Structured logging schema and field name constants for sterling.
//!
//! All crates use these constants for consistent structured logging fields.
//! This ensures log aggregation tools (Loki, Elasticsearch) can query by
//! standardized field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (transactions, field picks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "docupipe", "pipeline", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "outbox_driver", "classifier", "normalizer", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "submit", "rebuild_snapshot", "mark_step"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Outbox job UUID being delivered.
pub const JOB_ID: &str = "job_id";

/// Pipeline job (document) UUID being processed.
pub const DOCUMENT_ID: &str = "document_id";

/// Owning user UUID.
pub const USER_ID: &str = "user_id";

/// Stored file UUID.
pub const FILE_ID: &str = "file_id";

/// Queue name a job belongs to.
pub const QUEUE: &str = "queue";

/// Pipeline step name being updated.
pub const STEP: &str = "step";

/// Catalogue key assigned by classification.
pub const CATALOGUE_KEY: &str = "catalogue_key";

/// Snapshot month in `YYYY-MM` form.
pub const MONTH: &str = "month";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Claim attempt number for the current delivery.
pub const ATTEMPT: &str = "attempt";

/// Seconds until a failed job becomes claimable again.
pub const BACKOFF_SECS: &str = "backoff_secs";

/// Number of insights folded into a snapshot rebuild.
pub const INSIGHT_COUNT: &str = "insight_count";

/// Number of transactions in the aggregation pool.
pub const TRANSACTION_COUNT: &str = "transaction_count";

/// Classifier confidence for the winning rule.
pub const CONFIDENCE: &str = "confidence";

/// Signed residual from an integrity cross-check.
pub const DELTA: &str = "delta";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table or entity affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Dead-letter reason recorded for a terminal failure.
pub const REASON: &str = "reason";
