//! # sift-core
//!
//! Core types, traits, and abstractions for the sift analysis pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other sift crates depend on: the work-item model and its status
//! machine, the error taxonomy shared across the dispatch subsystem, the
//! repository and backend traits implemented by `sift-db` and
//! `sift-inference`, content hashing, and ignore-rule evaluation.

pub mod defaults;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use hash::{hash_bytes, hash_file, EMPTY_CONTENT_HASH};
pub use ignore::{IgnoreRule, IgnoreRules};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
