//! # sterling-core
//!
//! Core types, traits, and abstractions for the sterling document pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other sterling crates depend on: the shared error type, document and
//! analytics models, repository traits, money parsing, and PII hashing.

pub mod array_update;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod money;
pub mod pii;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use array_update::{build_update, ArrayOp, ArrayOperator, UpdateMode, UpdatePlan};
pub use error::{Error, Result};
pub use models::*;
pub use money::{amounts_match, parse_amount, round2};
pub use pii::{hash_identifier, mask_account_number, mask_ni_number, mask_sort_code};
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
