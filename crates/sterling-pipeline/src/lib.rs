//! # sterling-pipeline
//!
//! The document processing pipeline: outbox queue driver, classifier,
//! normalizers, account canonicalization, analytics rebuild and the
//! processors that tie them to the durable stores.
//!
//! This crate provides:
//! - [`OutboxDriver`]: polling delivery loops over the durable outbox
//! - [`DocumentProcessor`]: runs claimed documents through the pipeline
//!   steps (classify, standardize, normalize, index, ready)
//! - [`AnalyticsProcessor`] / [`AnalyticsEngine`]: deterministic monthly
//!   snapshot rebuilds
//! - [`DocumentService`]: the entry points the API boundary calls
//! - [`InlineOutbox`]: an in-process outbox that executes triggers at
//!   enqueue time, for tests and single-process tools
//!
//! Queue processors implement [`QueueProcessor`] and are registered on the
//! driver by queue name; the driver owns polling, claim, completion and
//! retry backoff, while processors own only their delivery logic.

pub mod analytics;
pub mod canonical;
pub mod classifier;
pub mod driver;
pub mod normalize;
pub mod processor;
pub mod service;

// Re-export core types
pub use sterling_core::*;

pub use analytics::AnalyticsEngine;
pub use canonical::{account_fingerprint, canonicalise_institution, CanonicalInstitution};
pub use classifier::{classify, content_window, Classification};
pub use driver::{
    DriverConfig, DriverEvent, DriverHandle, InlineOutbox, OutboxDriver, QueueProcessor,
};
pub use processor::{AnalyticsProcessor, DocumentProcessor};
pub use service::{DocumentService, EnqueueDocumentRequest, Stores};
