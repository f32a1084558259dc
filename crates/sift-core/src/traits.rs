//! Repository and backend trait definitions.
//!
//! These are the seams between the dispatch subsystem and its collaborators:
//! the durable store, the content-hash analysis cache (local and remote), the
//! inference endpoint, and the best-effort side channels (thumbnails, derived
//! view refresh). `sift-db` and `sift-inference` provide the production
//! implementations; tests substitute in-memory ones.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AnalysisRecord, Unit, WorkItem, WorkStatus};
use crate::Result;

// =============================================================================
// WORK ITEM STORE
// =============================================================================

/// Durable store for work items.
///
/// The store is the source of truth; the queue manager's in-memory view is a
/// derived cache rebuilt from `load_all` and reconciled against it. Methods
/// that touch more than one row execute in a single transaction.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Load every persisted work item.
    async fn load_all(&self) -> Result<Vec<WorkItem>>;

    /// Get a work item by ID.
    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>>;

    /// Get a work item by path (dedup key).
    async fn get_by_path(&self, path: &str) -> Result<Option<WorkItem>>;

    /// Atomically apply one enqueue batch: insert `inserts` as new rows and
    /// reset the rows in `resets` to pending with zero progress.
    async fn apply_enqueue(&self, inserts: &[WorkItem], resets: &[Uuid]) -> Result<()>;

    /// Transition an item's status, optionally attaching a failure message.
    async fn set_status(&self, id: Uuid, status: WorkStatus, error: Option<&str>) -> Result<()>;

    /// Update an item's progress percentage.
    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<()>;

    /// Re-queue an item for another attempt: pending, progress 0, the given
    /// retry count, and the triggering error preserved for display.
    async fn mark_retry(&self, id: Uuid, retry_count: i32, error: &str) -> Result<()>;

    /// Bulk-reset the given items to pending with zero progress, atomically.
    async fn reset_to_pending(&self, ids: &[Uuid]) -> Result<()>;

    /// Delete a single item.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Delete every item that is not completed. Returns the number removed.
    async fn delete_not_completed(&self) -> Result<i64>;

    /// Crash recovery: reset every `analyzing` row to `pending` with zero
    /// progress. An in-flight item from a previous process run is assumed
    /// abandoned. Returns the number of rows reset.
    async fn reset_orphaned_analyzing(&self) -> Result<i64>;
}

// =============================================================================
// ANALYSIS RESULT STORE / CACHE
// =============================================================================

/// Durable store for analysis results, addressable by content hash.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Look up a prior analysis of byte-identical content.
    async fn lookup_by_hash(&self, content_hash: &str) -> Result<Option<AnalysisRecord>>;

    /// Whether this exact path already has a persisted analysis.
    async fn is_path_analyzed(&self, path: &str) -> Result<bool>;

    /// Persist an analysis record together with its tag relations in one
    /// transaction.
    async fn persist(&self, record: &AnalysisRecord) -> Result<()>;

    /// Persist a recognized directory unit.
    async fn persist_unit(&self, unit: &Unit) -> Result<()>;
}

/// Shared/remote analysis cache, consulted after the local store misses.
#[async_trait]
pub trait RemoteAnalysisCache: Send + Sync {
    async fn lookup(&self, content_hash: &str) -> Result<Option<AnalysisRecord>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Embedding vector produced by an inference backend.
pub type Vector = Vec<f32>;

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one vector per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

/// Combined inference backend supporting both embedding and generation.
#[async_trait]
pub trait InferenceBackend: EmbeddingBackend + GenerationBackend {
    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// SIDE-CHANNEL COLLABORATORS
// =============================================================================

/// Best-effort thumbnail generation. Failures are logged and swallowed by the
/// dispatch loop; they never fail the item.
#[async_trait]
pub trait ThumbnailSink: Send + Sync {
    async fn generate(&self, path: &str) -> Result<()>;
}

/// Recomputes derived views (saved virtual-directory materializations) once
/// the queue drains.
#[async_trait]
pub trait DerivedViewRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// Resolves the workspace a filesystem path belongs to.
#[async_trait]
pub trait WorkspaceResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Option<Uuid>>;
}
