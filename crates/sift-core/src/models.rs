//! Core data model for the analysis dispatch pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// WORK ITEM TYPES
// =============================================================================

/// Status of a work item in the analysis queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Analyzing,
    Completed,
    Failed,
}

impl WorkStatus {
    /// Stable string form used by the durable store.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Analyzing => "analyzing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        }
    }

    /// Parse the durable-store string form. Unknown strings fall back to
    /// `Pending` so a corrupted row re-enters the queue rather than wedging it.
    pub fn from_str_or_pending(s: &str) -> Self {
        match s {
            "pending" => WorkStatus::Pending,
            "analyzing" => WorkStatus::Analyzing,
            "completed" => WorkStatus::Completed,
            "failed" => WorkStatus::Failed,
            _ => WorkStatus::Pending,
        }
    }
}

/// Kind of filesystem entry a work item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    /// A directory, subject to unit recognition or expansion.
    Folder,
    /// A regular file, subject to content analysis.
    File,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemKind::Folder => "folder",
            WorkItemKind::File => "file",
        }
    }

    pub fn from_str_or_file(s: &str) -> Self {
        match s {
            "folder" => WorkItemKind::Folder,
            _ => WorkItemKind::File,
        }
    }
}

/// One queued unit of analysis (a file or a directory).
///
/// Uniqueness for dedup-on-enqueue is by `path`; `id` disambiguates repeated
/// enqueues of the same path over time (UUIDv7 embeds the enqueue instant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub path: String,
    pub name: String,
    pub kind: WorkItemKind,
    /// Lowercase file extension; `None` for folders and extensionless files.
    pub extension: Option<String>,
    pub size: i64,
    pub status: WorkStatus,
    /// 0-100, monotonically non-decreasing within one attempt, reset on retry.
    pub progress: i32,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a new pending work item for the given path.
    pub fn new(path: impl Into<String>, kind: WorkItemKind, size: i64) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        let extension = match kind {
            WorkItemKind::Folder => None,
            WorkItemKind::File => name
                .rsplit_once('.')
                .filter(|(stem, _)| !stem.is_empty())
                .map(|(_, ext)| ext.to_ascii_lowercase()),
        };
        let now = Utc::now();
        Self {
            id: crate::uuid_utils::new_v7(),
            path,
            name,
            kind,
            extension,
            size,
            status: WorkStatus::Pending,
            progress: 0,
            error_message: None,
            retry_count: 0,
            added_at: now,
            updated_at: now,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == WorkItemKind::Folder
    }

    /// The item "type" label surfaced to observers: the extension, or "folder".
    pub fn type_label(&self) -> &str {
        match self.kind {
            WorkItemKind::Folder => "folder",
            WorkItemKind::File => self.extension.as_deref().unwrap_or(""),
        }
    }
}

/// Point-in-time view of the queue pushed to observers on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<WorkItem>,
    pub running: bool,
    pub current_item_id: Option<Uuid>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub analyzing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

// =============================================================================
// ANALYSIS RESULT TYPES
// =============================================================================

/// Persisted result of analyzing one file's content, keyed by content hash.
///
/// Byte-identical content at a different path reuses the same record rather
/// than paying for a second inference pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    /// SHA-256 of the file bytes, hex-encoded.
    pub content_hash: String,
    /// Path of the file this analysis was first produced for.
    pub path: String,
    /// Overall quality score in [0, 10].
    pub quality_score: Option<f32>,
    /// Named dimension scores (e.g. "clarity", "relevance").
    pub dimensions: HashMap<String, f32>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    /// Model that produced the analysis, when known.
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(content_hash: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: crate::uuid_utils::new_v7(),
            content_hash: content_hash.into(),
            path: path.into(),
            quality_score: None,
            dimensions: HashMap::new(),
            tags: Vec::new(),
            summary: None,
            model: None,
            created_at: Utc::now(),
        }
    }
}

/// A directory judged to be an atomic, non-decomposable grouping
/// (e.g. an album or a series) rather than something to expand into
/// child work items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub path: String,
    pub name: String,
    /// Label describing the grouping (e.g. "album", "project").
    pub kind_label: String,
    pub member_count: i32,
    /// Workspace the unit belongs to, when resolvable.
    pub workspace_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// ERROR TAXONOMY
// =============================================================================

/// Closed taxonomy of analysis failure kinds.
///
/// Classification is best-effort pattern matching over the raw failure text
/// plus a context tag; anything unmatched lands in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisErrorKind {
    FileNotFound,
    PermissionDenied,
    FileLocked,
    UnsupportedFormat,
    FileCorrupted,
    ProcessingTimeout,
    AiServiceError,
    ModelNotLoaded,
    AiRequestTimeout,
    AiClassificationFailed,
    DatabaseError,
    UnitRecognitionError,
    ProcessingError,
    Unknown,
}

/// Severity band for an error kind, used for logging and triage only —
/// severity does not itself gate retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnalysisErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisErrorKind::FileNotFound => "file_not_found",
            AnalysisErrorKind::PermissionDenied => "permission_denied",
            AnalysisErrorKind::FileLocked => "file_locked",
            AnalysisErrorKind::UnsupportedFormat => "unsupported_format",
            AnalysisErrorKind::FileCorrupted => "file_corrupted",
            AnalysisErrorKind::ProcessingTimeout => "processing_timeout",
            AnalysisErrorKind::AiServiceError => "ai_service_error",
            AnalysisErrorKind::ModelNotLoaded => "model_not_loaded",
            AnalysisErrorKind::AiRequestTimeout => "ai_request_timeout",
            AnalysisErrorKind::AiClassificationFailed => "ai_classification_failed",
            AnalysisErrorKind::DatabaseError => "database_error",
            AnalysisErrorKind::UnitRecognitionError => "unit_recognition_error",
            AnalysisErrorKind::ProcessingError => "processing_error",
            AnalysisErrorKind::Unknown => "unknown",
        }
    }

    /// Severity band for logging and triage.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AnalysisErrorKind::DatabaseError | AnalysisErrorKind::PermissionDenied => {
                ErrorSeverity::Critical
            }
            AnalysisErrorKind::AiServiceError
            | AnalysisErrorKind::ModelNotLoaded
            | AnalysisErrorKind::FileCorrupted => ErrorSeverity::High,
            AnalysisErrorKind::ProcessingTimeout
            | AnalysisErrorKind::AiRequestTimeout
            | AnalysisErrorKind::AiClassificationFailed
            | AnalysisErrorKind::FileLocked
            | AnalysisErrorKind::UnitRecognitionError
            | AnalysisErrorKind::ProcessingError => ErrorSeverity::Medium,
            AnalysisErrorKind::FileNotFound
            | AnalysisErrorKind::UnsupportedFormat
            | AnalysisErrorKind::Unknown => ErrorSeverity::Low,
        }
    }

    /// Human-readable hint shown alongside permanently failed items.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            AnalysisErrorKind::FileNotFound => "The file no longer exists at this path",
            AnalysisErrorKind::PermissionDenied => "Grant read access to the file and retry",
            AnalysisErrorKind::FileLocked => "Close the application holding the file open",
            AnalysisErrorKind::UnsupportedFormat => "This file format cannot be analyzed",
            AnalysisErrorKind::FileCorrupted => "The file appears damaged and cannot be read",
            AnalysisErrorKind::ProcessingTimeout => "Processing took too long; try a smaller file",
            AnalysisErrorKind::AiServiceError => "The analysis service returned an error",
            AnalysisErrorKind::ModelNotLoaded => "Wait for the model to finish loading",
            AnalysisErrorKind::AiRequestTimeout => "The analysis service did not respond in time",
            AnalysisErrorKind::AiClassificationFailed => "The analysis produced no usable result",
            AnalysisErrorKind::DatabaseError => "Check the storage backend and retry",
            AnalysisErrorKind::UnitRecognitionError => "Directory grouping detection failed",
            AnalysisErrorKind::ProcessingError => "An error occurred while processing the file",
            AnalysisErrorKind::Unknown => "An unexpected error occurred",
        }
    }
}

/// Append-only log entry recorded for every classified failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: AnalysisErrorKind,
    pub message: String,
    pub path: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub recovery_hint: String,
}

/// Aggregate statistics over the bounded error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub most_frequent_kind: Option<String>,
    /// Errors recorded in the last hour.
    pub last_hour: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_status_round_trip() {
        for status in [
            WorkStatus::Pending,
            WorkStatus::Analyzing,
            WorkStatus::Completed,
            WorkStatus::Failed,
        ] {
            let recovered = WorkStatus::from_str_or_pending(status.as_str());
            assert_eq!(status, recovered);
        }
    }

    #[test]
    fn test_work_status_unknown_fallback() {
        assert_eq!(
            WorkStatus::from_str_or_pending("cancelled"),
            WorkStatus::Pending
        );
        assert_eq!(WorkStatus::from_str_or_pending(""), WorkStatus::Pending);
    }

    #[test]
    fn test_work_item_new_file() {
        let item = WorkItem::new("/photos/trip/IMG_0001.JPG", WorkItemKind::File, 2048);
        assert_eq!(item.name, "IMG_0001.JPG");
        assert_eq!(item.extension.as_deref(), Some("jpg"));
        assert_eq!(item.status, WorkStatus::Pending);
        assert_eq!(item.progress, 0);
        assert_eq!(item.type_label(), "jpg");
        assert!(!item.is_folder());
    }

    #[test]
    fn test_work_item_new_folder() {
        let item = WorkItem::new("/photos/trip", WorkItemKind::Folder, 0);
        assert_eq!(item.name, "trip");
        assert!(item.extension.is_none());
        assert_eq!(item.type_label(), "folder");
        assert!(item.is_folder());
    }

    #[test]
    fn test_work_item_dotfile_has_no_extension() {
        let item = WorkItem::new("/home/u/.bashrc", WorkItemKind::File, 10);
        assert_eq!(item.name, ".bashrc");
        assert!(item.extension.is_none());
    }

    #[test]
    fn test_work_item_ids_unique_for_same_path() {
        let a = WorkItem::new("/same/path.txt", WorkItemKind::File, 1);
        let b = WorkItem::new("/same/path.txt", WorkItemKind::File, 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_error_kind_severity_bands() {
        assert_eq!(
            AnalysisErrorKind::DatabaseError.severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            AnalysisErrorKind::PermissionDenied.severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            AnalysisErrorKind::AiServiceError.severity(),
            ErrorSeverity::High
        );
        assert_eq!(
            AnalysisErrorKind::FileNotFound.severity(),
            ErrorSeverity::Low
        );
    }

    #[test]
    fn test_error_kind_strings_are_unique() {
        let kinds = [
            AnalysisErrorKind::FileNotFound,
            AnalysisErrorKind::PermissionDenied,
            AnalysisErrorKind::FileLocked,
            AnalysisErrorKind::UnsupportedFormat,
            AnalysisErrorKind::FileCorrupted,
            AnalysisErrorKind::ProcessingTimeout,
            AnalysisErrorKind::AiServiceError,
            AnalysisErrorKind::ModelNotLoaded,
            AnalysisErrorKind::AiRequestTimeout,
            AnalysisErrorKind::AiClassificationFailed,
            AnalysisErrorKind::DatabaseError,
            AnalysisErrorKind::UnitRecognitionError,
            AnalysisErrorKind::ProcessingError,
            AnalysisErrorKind::Unknown,
        ];

        let strings: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        let mut unique = strings.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(strings.len(), unique.len(), "kind strings must be unique");
        assert_eq!(kinds.len(), 14);
    }

    #[test]
    fn test_every_kind_has_a_hint() {
        for kind in [
            AnalysisErrorKind::FileNotFound,
            AnalysisErrorKind::Unknown,
            AnalysisErrorKind::DatabaseError,
        ] {
            assert!(!kind.recovery_hint().is_empty());
        }
    }

    #[test]
    fn test_analysis_record_new() {
        let rec = AnalysisRecord::new("abc123", "/data/report.pdf");
        assert_eq!(rec.content_hash, "abc123");
        assert_eq!(rec.path, "/data/report.pdf");
        assert!(rec.tags.is_empty());
        assert!(rec.quality_score.is_none());
    }

    #[test]
    fn test_queue_snapshot_serialization() {
        let snap = QueueSnapshot {
            items: vec![WorkItem::new("/a.txt", WorkItemKind::File, 1)],
            running: true,
            current_item_id: None,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"running\":true"));
        assert!(json.contains("a.txt"));
    }
}
