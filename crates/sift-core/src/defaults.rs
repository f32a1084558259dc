//! Centralized default constants for the sift analysis pipeline.
//!
//! **This module is the single source of truth** for all shared default
//! values. The other crates reference these constants instead of defining
//! their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// RETRY / RECOVERY POLICY
// =============================================================================

/// Default maximum retry count for failed analyses.
pub const MAX_RETRIES: i32 = 3;

/// Default base retry delay in milliseconds.
pub const BASE_RETRY_DELAY_MS: u64 = 1_000;

/// Exponential backoff multiplier applied per retry.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Hard cap on any computed retry delay.
pub const RETRY_DELAY_CAP_MS: u64 = 30_000;

/// Jitter band applied to retry delays to avoid synchronized retry storms.
pub const RETRY_JITTER_MIN: f64 = 0.85;
pub const RETRY_JITTER_MAX: f64 = 1.15;

/// Kind-specific minimum base delays. A locked file or a loading model needs
/// real wall-clock time to clear; retrying sooner just burns the budget.
pub const MIN_DELAY_FILE_LOCKED_MS: u64 = 5_000;
pub const MIN_DELAY_PROCESSING_TIMEOUT_MS: u64 = 4_000;
pub const MIN_DELAY_AI_TIMEOUT_MS: u64 = 3_000;
pub const MIN_DELAY_MODEL_NOT_LOADED_MS: u64 = 3_000;
pub const MIN_DELAY_DATABASE_ERROR_MS: u64 = 1_000;

/// File-size thresholds that shrink the retry budget for processing timeouts.
/// A timeout on a 150MB file will almost certainly time out again.
pub const LARGE_FILE_BYTES: i64 = 50 * 1024 * 1024;
pub const HUGE_FILE_BYTES: i64 = 100 * 1024 * 1024;

/// Retry caps applied at the size thresholds above.
pub const LARGE_FILE_TIMEOUT_RETRIES: i32 = 2;
pub const HUGE_FILE_TIMEOUT_RETRIES: i32 = 1;

/// Bounded error-history capacity. Once exceeded, the oldest half is dropped.
pub const ERROR_HISTORY_CAP: usize = 500;

// =============================================================================
// DISPATCH LOOP
// =============================================================================

/// Safety-net poll interval for the dispatch loop in milliseconds.
///
/// The loop parks on a wake signal; this interval only guards against a
/// dropped signal so work enqueued while parked is never missed.
pub const POLL_INTERVAL_MS: u64 = 1_000;

/// Per-file processing timeout in seconds.
pub const FILE_PROCESSING_TIMEOUT_SECS: u64 = 120;

/// Per-call inference request timeout in seconds.
pub const INFERENCE_TIMEOUT_SECS: u64 = 60;

/// Directory unit-recognition timeout in seconds.
pub const UNIT_RECOGNITION_TIMEOUT_SECS: u64 = 30;

/// Maximum bytes read during content extraction (10 MB).
pub const EXTRACTION_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Characters of extracted content included in analysis prompts.
pub const PROMPT_EXCERPT_CHARS: usize = 2_000;

// =============================================================================
// UNIT RECOGNITION POLICY
// =============================================================================

/// A directory with more immediate children than this is always expanded.
pub const UNIT_MAX_CHILDREN: usize = 200;

/// Minimum members for a directory to qualify as a unit at all.
pub const UNIT_MIN_MEMBERS: usize = 3;

/// Fraction of children that must share the dominant extension for a
/// directory to be treated as one atomic unit.
pub const UNIT_TYPE_PURITY: f64 = 0.7;

// =============================================================================
// CONCURRENCY CONTROLLER
// =============================================================================

/// Default ceiling on simultaneously executing inference calls.
pub const MAX_CONCURRENT_REQUESTS: usize = 4;

/// Default per-task timeout in the concurrency controller, in seconds.
pub const TASK_TIMEOUT_SECS: u64 = 60;

/// Bound on the force-terminate drain wait, in seconds.
pub const FORCE_TERMINATE_WAIT_SECS: u64 = 5;

// =============================================================================
// CONNECTION POOL
// =============================================================================

/// Default maximum keep-alive connections to the inference endpoint.
pub const MAX_CONNECTIONS: usize = 4;

/// Default wait bound for acquiring a connection, in seconds.
pub const CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Default idle timeout before a connection is recycled, in seconds.
/// The sweep runs at half this interval.
pub const IDLE_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// BATCH PROCESSOR
// =============================================================================

/// Requests per batch before a flush fires regardless of the timer.
pub const BATCH_SIZE: usize = 8;

/// Milliseconds after which a partial batch flushes anyway.
pub const BATCH_TIMEOUT_MS: u64 = 200;

/// Maximum batches in flight at once.
pub const MAX_CONCURRENT_BATCHES: usize = 2;

/// Default age-out for an individual queued request, in milliseconds.
pub const BATCH_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Fixed drain-tick interval for the batch processor, in milliseconds.
/// Bounds how stale a size-triggered flush or an age-out check can be.
pub const BATCH_TICK_MS: u64 = 25;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_constants_are_consistent() {
        const {
            assert!(RETRY_DELAY_CAP_MS >= MIN_DELAY_FILE_LOCKED_MS);
            assert!(HUGE_FILE_BYTES > LARGE_FILE_BYTES);
            assert!(HUGE_FILE_TIMEOUT_RETRIES < LARGE_FILE_TIMEOUT_RETRIES);
            assert!(LARGE_FILE_TIMEOUT_RETRIES < MAX_RETRIES);
        }
    }

    #[test]
    fn jitter_band_brackets_one() {
        assert!(RETRY_JITTER_MIN < 1.0);
        assert!(RETRY_JITTER_MAX > 1.0);
    }

    #[test]
    fn unit_policy_is_sane() {
        const {
            assert!(UNIT_MIN_MEMBERS < UNIT_MAX_CHILDREN);
        }
        assert!(UNIT_TYPE_PURITY > 0.5 && UNIT_TYPE_PURITY <= 1.0);
    }

    #[test]
    fn batch_defaults_are_sane() {
        const {
            assert!(BATCH_SIZE > 0);
            assert!(MAX_CONCURRENT_BATCHES > 0);
            assert!(BATCH_REQUEST_TIMEOUT_MS > BATCH_TIMEOUT_MS);
        }
    }
}
