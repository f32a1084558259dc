//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "queue", "dispatch", "inference", "db", "recovery"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "limiter", "pool", "batcher", "service", "classifier"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "enqueue", "claim", "analyze", "flush", "sweep"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Work item UUID being processed.
pub const ITEM_ID: &str = "item_id";

/// Filesystem path being operated on.
pub const PATH: &str = "path";

/// Content hash (SHA-256, hex) of a file under analysis.
pub const CONTENT_HASH: &str = "content_hash";

/// Classified error kind.
pub const ERROR_KIND: &str = "error_kind";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Current queue depth.
pub const QUEUE_DEPTH: &str = "queue_depth";

/// Current retry attempt number.
pub const RETRY_COUNT: &str = "retry_count";

/// Computed backoff delay in milliseconds.
pub const RETRY_DELAY_MS: &str = "retry_delay_ms";

/// Number of requests in a dispatched batch.
pub const BATCH_LEN: &str = "batch_len";

// ─── Pool fields ───────────────────────────────────────────────────────────

/// Number of connections currently open.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
