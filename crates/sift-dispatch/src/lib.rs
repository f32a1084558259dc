//! # sift-dispatch
//!
//! Durable work queue, failure recovery, and the analysis dispatch loop.
//!
//! This crate provides:
//! - [`QueueManager`]: the single choke point for work-item mutation, with
//!   dedup-by-path enqueue, crash recovery, and storage reconciliation
//! - [`RecoveryManager`]: failure classification into a closed taxonomy,
//!   class-specific retry gating, jittered exponential backoff, and a
//!   bounded error history
//! - [`AnalysisService`]: the single cooperative worker that expands
//!   directories or recognizes them as units, short-circuits analysis
//!   through the content-hash cache chain, and drives the full
//!   extraction + inference pipeline on a miss
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sift_dispatch::{EnqueueCandidate, QueueManager, ServiceBuilder};
//! use sift_core::IgnoreRules;
//!
//! let queue = Arc::new(QueueManager::new(store));
//! queue.load_from_store().await?;
//!
//! let service = ServiceBuilder::new(queue.clone(), analyses, backend).build();
//! let handle = service.start();
//!
//! queue
//!     .enqueue(vec![EnqueueCandidate::file("/data/report.pdf", 48_000)], false, &IgnoreRules::default())
//!     .await?;
//!
//! // ... later
//! handle.shutdown().await?;
//! ```

pub mod extract;
pub mod queue;
pub mod recovery;
pub mod service;
pub mod units;

// Re-export core types
pub use sift_core::*;

pub use extract::{ContentExtractor, ExtractedContent, TextExtractor};
pub use queue::{ConsistencyReport, EnqueueCandidate, QueueManager, QueueObserver};
pub use recovery::{
    classify_failure, classify_message, FailureStage, RecoveryManager, RecoveryPolicy,
};
pub use service::{
    parse_dimensions, parse_quality_score, parse_tags, AnalysisService, DispatchStats,
    ServiceBuilder, ServiceConfig, ServiceHandle,
};
pub use units::{ChildEntry, UnitDecision, UnitPolicy};

/// Default maximum retries for failed analyses.
pub const DEFAULT_MAX_RETRIES: i32 = sift_core::defaults::MAX_RETRIES;

/// Default park poll interval for the dispatch loop (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = sift_core::defaults::POLL_INTERVAL_MS;
