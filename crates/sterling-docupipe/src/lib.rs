//! # sterling-docupipe
//!
//! HTTP client for the DocuPipe document-standardization service.
//!
//! This crate provides:
//! - [`Standardizer`] trait: the seam the pipeline depends on
//! - [`DocupipeClient`]: reqwest-based implementation (submit, poll, fetch)
//! - [`mock::MockDocupipe`]: scriptable standardizer for tests
//!
//! The client is stateless per call. Retry and backoff policy belongs to the
//! pipeline layer; the only distinction surfaced here is a hard API error
//! (`Error::Docupipe`) versus an exhausted poll deadline
//! (`Error::DocupipeTimeout`), which dead-letter with different reasons.
//!
//! # Example
//!
//! ```rust,no_run
//! use sterling_docupipe::{DocupipeClient, DocupipeConfig, Standardizer};
//!
//! #[tokio::main]
//! async fn main() -> sterling_core::Result<()> {
//!     let client = DocupipeClient::new(DocupipeConfig::from_env())?;
//!     let submission = client.submit(b"%PDF-...", "payslip.pdf", None).await?;
//!     client.poll(&submission.job_id).await?;
//!     let payload = client.fetch_standardization(&submission.document_id).await?;
//!     println!("{payload}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod mock;

// Re-export core types
pub use sterling_core::*;

pub use client::{DocupipeClient, StandardizeStatus, Standardizer, Submission};
pub use config::{DocupipeConfig, DEFAULT_DOCUPIPE_URL};
pub use mock::{MockDocupipe, PollOutcome};
