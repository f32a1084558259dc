//! # sift-inference
//!
//! Inference endpoint client and outbound request scheduling for sift.
//!
//! This crate provides:
//! - An OpenAI-compatible HTTP client (chat completions with SSE streaming,
//!   embeddings, model listing, health probe)
//! - A keep-alive connection pool with idle recycling and hit-rate statistics
//! - A bounded-concurrency request limiter with priority ordering and
//!   per-call timeouts
//! - A request batch processor that flushes by size or timeout
//!
//! The dispatch loop drives exactly one work item at a time; the scheduling
//! layers here exist to amortize inference latency across that item's
//! sub-requests (tags, dimensions, quality), not to parallelize across items.
//!
//! # Example
//!
//! ```rust,no_run
//! use sift_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use sift_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let reply = backend.generate("Describe this file").await.unwrap();
//!     println!("{reply}");
//! }
//! ```

pub mod batch;
pub mod limiter;
pub mod openai;
pub mod pool;

// Re-export core types
pub use sift_core::*;

pub use batch::{BatchConfig, BatchExecutor, BatchProcessor, BatchStats, EmbeddingBatchExecutor};
pub use limiter::{ConcurrencyLimiter, LimiterConfig, LimiterStats};
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use pool::{ConnectionPool, ConnectionRecord, PoolConfig, PoolStats, PooledConnection};
