//! Failure classification, retry policy, and bounded error history.
//!
//! Raw failures are classified into the closed [`AnalysisErrorKind`]
//! taxonomy by an ordered rule table (first match wins), with structural
//! mapping for errors that already carry their cause. Retryability is
//! policy, not enum data: the never-retry and limited-retry sets live on
//! [`RecoveryPolicy`], and processing timeouts on large files get a further
//! reduced budget.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use tracing::debug;

use sift_core::{defaults, new_v7, AnalysisErrorKind, Error, ErrorRecord, ErrorStats};

/// Stage the failure was raised from; biases classification defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Inference call path.
    Ai,
    /// Directory unit recognition.
    Unit,
    /// File processing/extraction.
    Processing,
    /// Storage access.
    Database,
    /// No stage information.
    General,
}

/// One classification rule: a stage filter, a lowercase substring, and the
/// kind it maps to. Evaluated in order, first match wins.
struct ClassificationRule {
    stage: Option<FailureStage>,
    needle: &'static str,
    kind: AnalysisErrorKind,
}

const fn rule(
    stage: Option<FailureStage>,
    needle: &'static str,
    kind: AnalysisErrorKind,
) -> ClassificationRule {
    ClassificationRule {
        stage,
        needle,
        kind,
    }
}

/// Ordered classification table. More specific AI-stage rules come before
/// the generic filesystem rules so "model not found" never lands on
/// file-not-found.
static RULES: Lazy<Vec<ClassificationRule>> = Lazy::new(|| {
    use AnalysisErrorKind::*;
    use FailureStage::*;
    vec![
        rule(Some(Ai), "model not loaded", ModelNotLoaded),
        rule(Some(Ai), "no model", ModelNotLoaded),
        rule(Some(Ai), "loading model", ModelNotLoaded),
        rule(Some(Ai), "timed out", AiRequestTimeout),
        rule(Some(Ai), "timeout", AiRequestTimeout),
        rule(Some(Ai), "classification failed", AiClassificationFailed),
        rule(Some(Ai), "no usable result", AiClassificationFailed),
        rule(Some(Ai), "failed to parse", AiClassificationFailed),
        rule(None, "permission denied", PermissionDenied),
        rule(None, "access is denied", PermissionDenied),
        rule(None, "no such file", FileNotFound),
        rule(None, "file not found", FileNotFound),
        rule(None, "enoent", FileNotFound),
        rule(None, "being used by another process", FileLocked),
        rule(None, "resource busy", FileLocked),
        rule(None, "file is locked", FileLocked),
        rule(None, "unsupported format", UnsupportedFormat),
        rule(None, "unsupported file type", UnsupportedFormat),
        rule(None, "unknown format", UnsupportedFormat),
        rule(None, "corrupt", FileCorrupted),
        rule(None, "damaged", FileCorrupted),
        rule(None, "unexpected eof", FileCorrupted),
        rule(None, "invalid header", FileCorrupted),
        rule(Some(Processing), "timed out", ProcessingTimeout),
        rule(Some(Processing), "timeout", ProcessingTimeout),
        rule(None, "database", DatabaseError),
        rule(None, "sql", DatabaseError),
        rule(None, "connection refused", DatabaseError),
        rule(Some(Unit), "recognition", UnitRecognitionError),
    ]
});

/// Classify a raw failure message. Best-effort string matching; anything
/// unmatched falls back to the stage default.
pub fn classify_message(message: &str, stage: FailureStage) -> AnalysisErrorKind {
    let lowered = message.to_lowercase();

    for rule in RULES.iter() {
        let stage_ok = rule.stage.map_or(true, |s| s == stage);
        if stage_ok && lowered.contains(rule.needle) {
            return rule.kind;
        }
    }

    match stage {
        FailureStage::Ai => AnalysisErrorKind::AiServiceError,
        FailureStage::Unit => AnalysisErrorKind::UnitRecognitionError,
        FailureStage::Processing => AnalysisErrorKind::ProcessingError,
        FailureStage::Database => AnalysisErrorKind::DatabaseError,
        FailureStage::General => AnalysisErrorKind::Unknown,
    }
}

/// Classify a structured [`Error`], using its variant where it already names
/// the cause and falling back to message rules otherwise.
pub fn classify_failure(error: &Error, stage: FailureStage) -> AnalysisErrorKind {
    match error {
        Error::Database(_) => AnalysisErrorKind::DatabaseError,
        Error::Io(io) => match io.kind() {
            std::io::ErrorKind::NotFound => AnalysisErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => AnalysisErrorKind::PermissionDenied,
            _ => classify_message(&io.to_string(), stage),
        },
        Error::Inference(msg) | Error::Embedding(msg) => classify_message(msg, FailureStage::Ai),
        Error::Timeout(msg) => match stage {
            FailureStage::Ai => AnalysisErrorKind::AiRequestTimeout,
            _ => classify_message(msg, FailureStage::Processing),
        },
        Error::Extraction(msg) => classify_message(msg, FailureStage::Processing),
        other => classify_message(&other.to_string(), stage),
    }
}

/// Immutable-after-construction recovery configuration.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// General retry ceiling.
    pub max_retries: i32,
    /// Base backoff delay for kinds without a specific minimum.
    pub base_retry_delay: Duration,
    /// Exponential backoff multiplier per attempt.
    pub backoff_multiplier: f64,
    /// Per-file processing timeout.
    pub file_processing_timeout: Duration,
    /// Per-call inference timeout.
    pub inference_timeout: Duration,
    /// Directory unit-recognition timeout.
    pub unit_recognition_timeout: Duration,
    /// Persist a basic record when AI analysis is unavailable.
    pub fallback_to_basic_analysis: bool,
    /// Halt the whole pipeline on critical-severity kinds instead of
    /// retrying item by item.
    pub skip_on_critical_error: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_retry_delay: Duration::from_millis(defaults::BASE_RETRY_DELAY_MS),
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            file_processing_timeout: Duration::from_secs(defaults::FILE_PROCESSING_TIMEOUT_SECS),
            inference_timeout: Duration::from_secs(defaults::INFERENCE_TIMEOUT_SECS),
            unit_recognition_timeout: Duration::from_secs(defaults::UNIT_RECOGNITION_TIMEOUT_SECS),
            fallback_to_basic_analysis: false,
            skip_on_critical_error: false,
        }
    }
}

impl RecoveryPolicy {
    pub fn with_max_retries(mut self, n: i32) -> Self {
        self.max_retries = n.max(0);
        self
    }

    pub fn with_base_retry_delay(mut self, d: Duration) -> Self {
        self.base_retry_delay = d;
        self
    }

    pub fn with_skip_on_critical_error(mut self, enabled: bool) -> Self {
        self.skip_on_critical_error = enabled;
        self
    }

    /// Create a policy from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SIFT_MAX_RETRIES` | `3` |
    /// | `SIFT_BASE_RETRY_DELAY_MS` | `1000` |
    /// | `SIFT_SKIP_ON_CRITICAL` | `false` |
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(n) = std::env::var("SIFT_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
        {
            policy.max_retries = n.max(0);
        }
        if let Some(ms) = std::env::var("SIFT_BASE_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            policy.base_retry_delay = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("SIFT_SKIP_ON_CRITICAL") {
            policy.skip_on_critical_error = v == "1" || v.to_lowercase() == "true";
        }
        policy
    }
}

/// Kinds that never retry regardless of attempt count: the failure is a
/// property of the file, not the run.
const NEVER_RETRY: &[AnalysisErrorKind] = &[
    AnalysisErrorKind::FileNotFound,
    AnalysisErrorKind::UnsupportedFormat,
    AnalysisErrorKind::FileCorrupted,
    AnalysisErrorKind::PermissionDenied,
];

/// Kinds capped at half the general retry ceiling.
const LIMITED_RETRY: &[AnalysisErrorKind] = &[
    AnalysisErrorKind::FileLocked,
    AnalysisErrorKind::ProcessingTimeout,
    AnalysisErrorKind::AiRequestTimeout,
    AnalysisErrorKind::DatabaseError,
    AnalysisErrorKind::ModelNotLoaded,
];

/// Classifier, retry gate, backoff calculator, and bounded error history.
pub struct RecoveryManager {
    policy: RecoveryPolicy,
    history: Mutex<VecDeque<ErrorRecord>>,
    history_cap: usize,
}

impl RecoveryManager {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            history: Mutex::new(VecDeque::new()),
            history_cap: defaults::ERROR_HISTORY_CAP,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RecoveryPolicy::default())
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Whether another attempt is allowed for this kind at this count.
    /// `file_size` further shrinks the budget for processing timeouts.
    pub fn should_retry(
        &self,
        kind: AnalysisErrorKind,
        retry_count: i32,
        file_size: Option<i64>,
    ) -> bool {
        if retry_count >= self.policy.max_retries {
            return false;
        }
        if NEVER_RETRY.contains(&kind) {
            return false;
        }

        let mut cap = self.policy.max_retries;
        if LIMITED_RETRY.contains(&kind) {
            cap = self.policy.max_retries / 2;
        }
        if kind == AnalysisErrorKind::ProcessingTimeout {
            if let Some(size) = file_size {
                if size > defaults::HUGE_FILE_BYTES {
                    cap = cap.min(defaults::HUGE_FILE_TIMEOUT_RETRIES);
                } else if size > defaults::LARGE_FILE_BYTES {
                    cap = cap.min(defaults::LARGE_FILE_TIMEOUT_RETRIES);
                }
            }
        }

        retry_count < cap
    }

    /// Pre-jitter backoff delay in milliseconds: kind-specific base times
    /// the multiplier raised to the attempt, capped at the global ceiling.
    pub fn retry_delay_base_ms(&self, retry_count: i32, kind: AnalysisErrorKind) -> u64 {
        let policy_base = self.policy.base_retry_delay.as_millis() as u64;
        let base = match kind {
            AnalysisErrorKind::FileLocked => policy_base.max(defaults::MIN_DELAY_FILE_LOCKED_MS),
            AnalysisErrorKind::AiRequestTimeout => {
                policy_base.max(defaults::MIN_DELAY_AI_TIMEOUT_MS)
            }
            AnalysisErrorKind::ModelNotLoaded => {
                policy_base.max(defaults::MIN_DELAY_MODEL_NOT_LOADED_MS)
            }
            AnalysisErrorKind::ProcessingTimeout => {
                policy_base.max(defaults::MIN_DELAY_PROCESSING_TIMEOUT_MS)
            }
            AnalysisErrorKind::DatabaseError => {
                policy_base.max(defaults::MIN_DELAY_DATABASE_ERROR_MS)
            }
            _ => policy_base,
        };

        let raw = base as f64 * self.policy.backoff_multiplier.powi(retry_count.max(0));
        raw.min(defaults::RETRY_DELAY_CAP_MS as f64) as u64
    }

    /// Backoff delay with uniform jitter applied, so simultaneous failures
    /// across items do not retry in lockstep.
    pub fn retry_delay(&self, retry_count: i32, kind: AnalysisErrorKind) -> Duration {
        let base = self.retry_delay_base_ms(retry_count, kind) as f64;
        let jitter = rand::thread_rng()
            .gen_range(defaults::RETRY_JITTER_MIN..=defaults::RETRY_JITTER_MAX);
        Duration::from_millis((base * jitter) as u64)
    }

    /// Whether this kind should halt the whole pipeline (policy-gated).
    pub fn is_critical(&self, kind: AnalysisErrorKind) -> bool {
        self.policy.skip_on_critical_error
            && kind.severity() == sift_core::ErrorSeverity::Critical
    }

    /// Append to the bounded history and return updated aggregate stats.
    /// Past the cap, the oldest half of the history is dropped.
    pub fn record(
        &self,
        kind: AnalysisErrorKind,
        message: &str,
        path: Option<&str>,
        retry_count: i32,
    ) -> ErrorStats {
        let record = ErrorRecord {
            id: new_v7(),
            timestamp: Utc::now(),
            kind,
            message: message.to_string(),
            path: path.map(String::from),
            retry_count,
            max_retries: self.policy.max_retries,
            recovery_hint: kind.recovery_hint().to_string(),
        };

        {
            let mut history = self.history.lock().unwrap();
            history.push_back(record);
            if history.len() > self.history_cap {
                let drop = history.len() / 2;
                history.drain(..drop);
                debug!(
                    subsystem = "recovery",
                    op = "evict",
                    dropped = drop,
                    "Error history cap exceeded, dropped oldest half"
                );
            }
        }

        self.stats()
    }

    /// Aggregate statistics over the retained history.
    pub fn stats(&self) -> ErrorStats {
        let history = self.history.lock().unwrap();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let mut last_hour = 0;

        for record in history.iter() {
            *by_kind.entry(record.kind.as_str().to_string()).or_default() += 1;
            let severity = format!("{:?}", record.kind.severity()).to_lowercase();
            *by_severity.entry(severity).or_default() += 1;
            if record.timestamp >= hour_ago {
                last_hour += 1;
            }
        }

        let most_frequent_kind = by_kind
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(kind, _)| kind.clone());

        ErrorStats {
            total: history.len(),
            by_kind,
            by_severity,
            most_frequent_kind,
            last_hour,
        }
    }

    /// Recent records, newest last.
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let history = self.history.lock().unwrap();
        history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .rev()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AnalysisErrorKind::*;

    fn manager() -> RecoveryManager {
        RecoveryManager::with_defaults()
    }

    // ---- classification ----

    #[test]
    fn test_classify_file_not_found() {
        assert_eq!(
            classify_message("ENOENT: no such file or directory", FailureStage::Processing),
            FileNotFound
        );
    }

    #[test]
    fn test_classify_permission_denied_any_stage() {
        assert_eq!(
            classify_message("permission denied (os error 13)", FailureStage::General),
            PermissionDenied
        );
    }

    #[test]
    fn test_classify_ai_timeout_before_generic_timeout() {
        assert_eq!(
            classify_message("request timed out after 60s", FailureStage::Ai),
            AiRequestTimeout
        );
        assert_eq!(
            classify_message("request timed out after 120s", FailureStage::Processing),
            ProcessingTimeout
        );
    }

    #[test]
    fn test_classify_model_not_loaded_wins_over_not_found() {
        // "model not loaded" must not fall through to file rules
        assert_eq!(
            classify_message("model not loaded yet", FailureStage::Ai),
            ModelNotLoaded
        );
    }

    #[test]
    fn test_classify_stage_defaults() {
        assert_eq!(classify_message("???", FailureStage::Ai), AiServiceError);
        assert_eq!(
            classify_message("???", FailureStage::Unit),
            UnitRecognitionError
        );
        assert_eq!(
            classify_message("???", FailureStage::Processing),
            ProcessingError
        );
        assert_eq!(classify_message("???", FailureStage::General), Unknown);
    }

    #[test]
    fn test_classify_corruption() {
        assert_eq!(
            classify_message("unexpected EOF while reading archive", FailureStage::Processing),
            FileCorrupted
        );
    }

    #[test]
    fn test_classify_structured_io() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(classify_failure(&err, FailureStage::Processing), FileNotFound);

        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        assert_eq!(
            classify_failure(&err, FailureStage::Processing),
            PermissionDenied
        );
    }

    #[test]
    fn test_classify_structured_timeout_by_stage() {
        let err = Error::Timeout("task exceeded 60s".into());
        assert_eq!(classify_failure(&err, FailureStage::Ai), AiRequestTimeout);
        assert_eq!(
            classify_failure(&err, FailureStage::Processing),
            ProcessingTimeout
        );
    }

    #[test]
    fn test_classify_inference_error_is_ai_stage() {
        let err = Error::Inference("backend exploded".into());
        assert_eq!(
            classify_failure(&err, FailureStage::Processing),
            AiServiceError
        );
    }

    // ---- retry gating ----

    #[test]
    fn test_never_retry_set() {
        let m = manager();
        for kind in [FileNotFound, UnsupportedFormat, FileCorrupted, PermissionDenied] {
            assert!(!m.should_retry(kind, 0, None), "{kind:?} must never retry");
        }
    }

    #[test]
    fn test_general_cap() {
        let m = manager();
        assert!(m.should_retry(ProcessingError, 0, None));
        assert!(m.should_retry(ProcessingError, 2, None));
        assert!(!m.should_retry(ProcessingError, 3, None));
    }

    #[test]
    fn test_limited_retry_half_cap() {
        let m = RecoveryManager::new(RecoveryPolicy::default().with_max_retries(6));
        // floor(6/2) = 3
        assert!(m.should_retry(FileLocked, 2, None));
        assert!(!m.should_retry(FileLocked, 3, None));
    }

    #[test]
    fn test_huge_file_timeout_single_retry() {
        // Large ceiling to show the size cap dominates
        let m = RecoveryManager::new(RecoveryPolicy::default().with_max_retries(10));
        let size = 150 * 1024 * 1024;
        assert!(m.should_retry(ProcessingTimeout, 0, Some(size)));
        assert!(!m.should_retry(ProcessingTimeout, 1, Some(size)));
        assert!(!m.should_retry(ProcessingTimeout, 5, Some(size)));
    }

    #[test]
    fn test_large_file_timeout_two_retries() {
        let m = RecoveryManager::new(RecoveryPolicy::default().with_max_retries(10));
        let size = 60 * 1024 * 1024;
        assert!(m.should_retry(ProcessingTimeout, 1, Some(size)));
        assert!(!m.should_retry(ProcessingTimeout, 2, Some(size)));
    }

    #[test]
    fn test_size_caps_only_apply_to_processing_timeout() {
        let m = RecoveryManager::new(RecoveryPolicy::default().with_max_retries(10));
        let size = 150 * 1024 * 1024;
        // AiRequestTimeout is limited (half cap = 5) but not size-capped
        assert!(m.should_retry(AiRequestTimeout, 3, Some(size)));
    }

    // ---- backoff ----

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let m = manager();
        for kind in [ProcessingError, FileLocked, DatabaseError, AiRequestTimeout] {
            let mut prev = 0;
            for attempt in 0..12 {
                let delay = m.retry_delay_base_ms(attempt, kind);
                assert!(delay <= defaults::RETRY_DELAY_CAP_MS);
                assert!(delay >= prev, "backoff must be non-decreasing before the cap");
                prev = delay;
            }
            assert_eq!(m.retry_delay_base_ms(11, kind), defaults::RETRY_DELAY_CAP_MS);
        }
    }

    #[test]
    fn test_kind_specific_minimum_delays() {
        let m = manager();
        assert!(m.retry_delay_base_ms(0, FileLocked) >= 5_000);
        assert!(m.retry_delay_base_ms(0, AiRequestTimeout) >= 3_000);
        assert!(m.retry_delay_base_ms(0, ModelNotLoaded) >= 3_000);
        assert!(m.retry_delay_base_ms(0, ProcessingTimeout) >= 4_000);
        assert!(m.retry_delay_base_ms(0, DatabaseError) >= 1_000);
        assert_eq!(
            m.retry_delay_base_ms(0, ProcessingError),
            defaults::BASE_RETRY_DELAY_MS
        );
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let m = manager();
        let base = m.retry_delay_base_ms(1, ProcessingError) as f64;
        for _ in 0..100 {
            let jittered = m.retry_delay(1, ProcessingError).as_millis() as f64;
            assert!(jittered >= base * defaults::RETRY_JITTER_MIN - 1.0);
            assert!(jittered <= base * defaults::RETRY_JITTER_MAX + 1.0);
        }
    }

    // ---- critical gating ----

    #[test]
    fn test_critical_requires_policy_flag() {
        let off = manager();
        assert!(!off.is_critical(DatabaseError));

        let on = RecoveryManager::new(
            RecoveryPolicy::default().with_skip_on_critical_error(true),
        );
        assert!(on.is_critical(DatabaseError));
        assert!(on.is_critical(PermissionDenied));
        assert!(!on.is_critical(ProcessingError));
    }

    // ---- history ----

    #[test]
    fn test_record_and_stats() {
        let m = manager();
        m.record(FileNotFound, "gone", Some("/a"), 0);
        m.record(FileNotFound, "gone again", Some("/b"), 0);
        let stats = m.record(DatabaseError, "pg down", None, 1);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get("file_not_found"), Some(&2));
        assert_eq!(stats.by_kind.get("database_error"), Some(&1));
        assert_eq!(stats.most_frequent_kind.as_deref(), Some("file_not_found"));
        assert_eq!(stats.last_hour, 3);
        assert_eq!(stats.by_severity.get("critical"), Some(&1));
    }

    #[test]
    fn test_history_drops_oldest_half_past_cap() {
        let m = manager();
        for i in 0..(defaults::ERROR_HISTORY_CAP + 1) {
            m.record(ProcessingError, &format!("e{i}"), None, 0);
        }
        let stats = m.stats();
        assert!(stats.total <= defaults::ERROR_HISTORY_CAP / 2 + 1);

        // Newest entries survived
        let recent = m.recent(1);
        assert_eq!(recent[0].message, format!("e{}", defaults::ERROR_HISTORY_CAP));
    }

    #[test]
    fn test_record_carries_hint() {
        let m = manager();
        m.record(PermissionDenied, "denied", Some("/x"), 0);
        let recent = m.recent(1);
        assert_eq!(recent[0].recovery_hint, PermissionDenied.recovery_hint());
    }
}
