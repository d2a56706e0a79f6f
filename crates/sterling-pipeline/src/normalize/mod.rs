//! Normalizers that turn standardized payloads into canonical metrics.
//!
//! Each document kind gets the normalizer for its family: payslips verify
//! the net-pay identity, the five statement kinds verify balance
//! reconciliation. The normalizers return structured results; deciding what
//! a failed check means for the document is the processor's job.

pub mod fields;
pub mod payslip;
pub mod statement;

pub use payslip::{normalize_payslip, PayslipNormalized};
pub use statement::{normalize_statement, StatementNormalized};

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use fields::pick_date;

const DOCUMENT_DATE: &[&str] = &[
    "date",
    "issueDate",
    "issue_date",
    "letterDate",
    "documentDate",
    "periodEnd",
    "period_end",
    "payDate",
];

/// Best-effort document date for kinds without a dedicated normalizer,
/// currently HMRC correspondence. Tries the date fields any of the
/// standardization schemas may emit.
pub fn document_date(payload: &JsonValue) -> Option<NaiveDate> {
    pick_date(payload, DOCUMENT_DATE).map(|p| p.value)
}
