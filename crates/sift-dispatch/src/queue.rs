//! Durable work queue management.
//!
//! The [`QueueManager`] owns every mutation of the work-item set. The durable
//! store is the source of truth; the in-memory vector here is a derived,
//! rebuildable cache kept in enqueue order. Multi-row mutations go through
//! the store's transactional batch operations, and a failed transaction
//! triggers a full reload so the cached view can never hold state storage
//! disagrees with.
//!
//! Observers receive a [`QueueSnapshot`] on every state change; the dispatch
//! loop parks on the shared [`Notify`] wake handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sift_core::{
    Error, IgnoreRules, QueueSnapshot, QueueStats, Result, WorkItem, WorkItemKind, WorkItemStore,
    WorkStatus,
};

/// Observer notified with a fresh snapshot on every queue state change.
pub trait QueueObserver: Send + Sync {
    fn on_update(&self, snapshot: &QueueSnapshot);

    /// Hook reserved for configuration persistence; default no-op.
    fn on_persist(&self) {}
}

/// One candidate handed to [`QueueManager::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueCandidate {
    pub path: String,
    pub kind: WorkItemKind,
    pub size: i64,
}

impl EnqueueCandidate {
    pub fn file(path: impl Into<String>, size: i64) -> Self {
        Self {
            path: path.into(),
            kind: WorkItemKind::File,
            size,
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: WorkItemKind::Folder,
            size: 0,
        }
    }
}

/// Outcome of a [`QueueManager::validate_consistency`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Items present only in memory, dropped.
    pub dropped: usize,
    /// Items whose status was corrected to the persisted value.
    pub corrected: usize,
    /// Persisted non-completed items restored into memory.
    pub restored: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        *self == Self::default()
    }
}

/// Owner of the durable work-item table and its in-memory view.
pub struct QueueManager {
    store: Arc<dyn WorkItemStore>,
    items: RwLock<Vec<WorkItem>>,
    observers: std::sync::Mutex<Vec<Arc<dyn QueueObserver>>>,
    wake: Arc<Notify>,
    running: AtomicBool,
    current_item: Mutex<Option<Uuid>>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn WorkItemStore>) -> Self {
        Self {
            store,
            items: RwLock::new(Vec::new()),
            observers: std::sync::Mutex::new(Vec::new()),
            wake: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
            current_item: Mutex::new(None),
        }
    }

    /// Register a snapshot observer.
    pub fn add_observer(&self, observer: Arc<dyn QueueObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Wake handle the dispatch loop selects on. Signaled whenever new
    /// pending work appears.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Hydrate the in-memory queue from storage.
    ///
    /// Persisted `analyzing` rows are forcibly reset to `pending` first: an
    /// in-flight item from a previous process run is assumed abandoned.
    /// Already-completed items are excluded from the hydrated view.
    pub async fn load_from_store(&self) -> Result<usize> {
        let recovered = self.store.reset_orphaned_analyzing().await?;
        if recovered > 0 {
            info!(
                subsystem = "queue",
                op = "recover",
                recovered,
                "Reset orphaned analyzing items to pending"
            );
        }

        let loaded: Vec<WorkItem> = self
            .store
            .load_all()
            .await?
            .into_iter()
            .filter(|item| item.status != WorkStatus::Completed)
            .collect();

        let count = loaded.len();
        *self.items.write().await = loaded;

        info!(
            subsystem = "queue",
            op = "load",
            queue_depth = count,
            "Hydrated queue from store"
        );
        self.notify_observers().await;
        if count > 0 {
            self.wake.notify_waiters();
        }
        Ok(count)
    }

    /// Enqueue a batch of candidates.
    ///
    /// Ignore-rule filtering happens first. A candidate whose path already
    /// has a work item is a no-op unless `force_reanalyze`, which resets the
    /// existing item to pending. All resulting mutations are applied in one
    /// storage transaction; if it fails, the in-memory view is reloaded from
    /// the store before the error is returned.
    ///
    /// Returns the number of items inserted or reset.
    pub async fn enqueue(
        &self,
        candidates: Vec<EnqueueCandidate>,
        force_reanalyze: bool,
        rules: &IgnoreRules,
    ) -> Result<usize> {
        let (inserts, resets) = {
            let items = self.items.read().await;
            let mut inserts: Vec<WorkItem> = Vec::new();
            let mut resets: Vec<Uuid> = Vec::new();

            for candidate in candidates {
                let name = candidate
                    .path
                    .rsplit(['/', '\\'])
                    .next()
                    .unwrap_or(candidate.path.as_str());
                if rules.should_ignore(&candidate.path, name) {
                    debug!(
                        subsystem = "queue",
                        op = "enqueue",
                        path = %candidate.path,
                        "Skipped by ignore rules"
                    );
                    continue;
                }

                // Dedup is by path, against memory and this batch.
                if let Some(existing) = items.iter().find(|i| i.path == candidate.path) {
                    if force_reanalyze && !resets.contains(&existing.id) {
                        resets.push(existing.id);
                    }
                    continue;
                }
                if inserts.iter().any(|i| i.path == candidate.path) {
                    continue;
                }

                inserts.push(WorkItem::new(candidate.path, candidate.kind, candidate.size));
            }
            (inserts, resets)
        };

        if inserts.is_empty() && resets.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.store.apply_enqueue(&inserts, &resets).await {
            warn!(
                subsystem = "queue",
                op = "enqueue",
                error = %e,
                "Enqueue transaction failed, reloading queue from store"
            );
            self.reload().await?;
            return Err(e);
        }

        let changed = inserts.len() + resets.len();
        {
            let mut items = self.items.write().await;
            for id in &resets {
                if let Some(item) = items.iter_mut().find(|i| i.id == *id) {
                    item.status = WorkStatus::Pending;
                    item.progress = 0;
                    item.error_message = None;
                }
            }
            items.extend(inserts);
        }

        debug!(
            subsystem = "queue",
            op = "enqueue",
            added = changed,
            "Enqueued work items"
        );
        self.notify_observers().await;
        self.wake.notify_waiters();
        Ok(changed)
    }

    /// Bulk-transition every failed item back to pending.
    pub async fn retry_failed(&self) -> Result<usize> {
        let ids: Vec<Uuid> = {
            let items = self.items.read().await;
            items
                .iter()
                .filter(|i| i.status == WorkStatus::Failed)
                .map(|i| i.id)
                .collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }

        self.store.reset_to_pending(&ids).await?;

        {
            let mut items = self.items.write().await;
            for item in items.iter_mut() {
                if ids.contains(&item.id) {
                    item.status = WorkStatus::Pending;
                    item.progress = 0;
                }
            }
        }

        info!(subsystem = "queue", op = "retry", count = ids.len(), "Retrying failed items");
        self.notify_observers().await;
        self.wake.notify_waiters();
        Ok(ids.len())
    }

    /// Delete every non-completed item from memory and storage.
    pub async fn clear_pending(&self) -> Result<i64> {
        let removed = self.store.delete_not_completed().await?;

        {
            let mut items = self.items.write().await;
            items.retain(|i| i.status == WorkStatus::Completed);
        }

        info!(subsystem = "queue", op = "clear", removed, "Cleared non-completed items");
        self.notify_observers().await;
        Ok(removed)
    }

    /// Delete a single item.
    pub async fn delete_item(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await?;
        {
            let mut items = self.items.write().await;
            items.retain(|i| i.id != id);
        }
        self.notify_observers().await;
        Ok(())
    }

    /// Point-in-time snapshot for observers and the UI layer.
    pub async fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.read().await.clone(),
            running: self.running.load(Ordering::Relaxed),
            current_item_id: *self.current_item.lock().await,
        }
    }

    /// Queue depth statistics.
    pub async fn stats(&self) -> QueueStats {
        let items = self.items.read().await;
        let mut stats = QueueStats {
            pending: 0,
            analyzing: 0,
            completed: 0,
            failed: 0,
            total: items.len() as i64,
        };
        for item in items.iter() {
            match item.status {
                WorkStatus::Pending => stats.pending += 1,
                WorkStatus::Analyzing => stats.analyzing += 1,
                WorkStatus::Completed => stats.completed += 1,
                WorkStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Reconcile the in-memory view against storage. Storage wins on every
    /// conflict: memory-only items are dropped, status mismatches take the
    /// persisted value, and persisted non-completed items missing from
    /// memory are restored.
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        let persisted = self.store.load_all().await?;
        let mut report = ConsistencyReport::default();

        {
            let mut items = self.items.write().await;

            let before = items.len();
            items.retain(|item| persisted.iter().any(|p| p.id == item.id));
            report.dropped = before - items.len();

            for item in items.iter_mut() {
                if let Some(p) = persisted.iter().find(|p| p.id == item.id) {
                    if p.status != item.status {
                        item.status = p.status;
                        item.progress = p.progress;
                        item.error_message = p.error_message.clone();
                        report.corrected += 1;
                    }
                }
            }

            for p in persisted {
                if p.status != WorkStatus::Completed && !items.iter().any(|i| i.id == p.id) {
                    items.push(p);
                    report.restored += 1;
                }
            }

            // Restore enqueue order (UUIDv7 ids are time-ordered).
            items.sort_by_key(|i| i.id);
        }

        if !report.is_consistent() {
            warn!(
                subsystem = "queue",
                op = "reconcile",
                dropped = report.dropped,
                corrected = report.corrected,
                restored = report.restored,
                "Queue state corrected against storage"
            );
            self.notify_observers().await;
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Dispatch-loop surface
    // ------------------------------------------------------------------

    /// First pending item in queue order.
    pub async fn next_pending(&self) -> Option<WorkItem> {
        self.items
            .read()
            .await
            .iter()
            .find(|i| i.status == WorkStatus::Pending)
            .cloned()
    }

    pub async fn has_pending(&self) -> bool {
        self.items
            .read()
            .await
            .iter()
            .any(|i| i.status == WorkStatus::Pending)
    }

    /// Transition an item into `analyzing`. Fails if another item is already
    /// being analyzed; at most one item is active system-wide.
    pub async fn begin_analysis(&self, id: Uuid) -> Result<()> {
        {
            let items = self.items.read().await;
            if let Some(active) = items.iter().find(|i| i.status == WorkStatus::Analyzing) {
                return Err(Error::Queue(format!(
                    "item {} is already analyzing",
                    active.id
                )));
            }
        }

        self.store.set_status(id, WorkStatus::Analyzing, None).await?;

        {
            let mut items = self.items.write().await;
            if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                item.status = WorkStatus::Analyzing;
                item.progress = 0;
                item.error_message = None;
            }
        }
        *self.current_item.lock().await = Some(id);
        self.notify_observers().await;
        Ok(())
    }

    /// Update progress for the active item. Progress never moves backwards
    /// within an attempt.
    pub async fn set_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        let progress = progress.clamp(0, 100);
        let changed = {
            let mut items = self.items.write().await;
            match items.iter_mut().find(|i| i.id == id) {
                Some(item) if item.progress < progress => {
                    item.progress = progress;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.store.set_progress(id, progress).await?;
            self.notify_observers().await;
        }
        Ok(())
    }

    /// Mark the active item completed.
    pub async fn complete_item(&self, id: Uuid) -> Result<()> {
        self.store.set_status(id, WorkStatus::Completed, None).await?;
        {
            let mut items = self.items.write().await;
            if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                item.status = WorkStatus::Completed;
                item.progress = 100;
            }
        }
        self.clear_current(id).await;
        self.notify_observers().await;
        Ok(())
    }

    /// Mark the active item failed with the triggering message.
    pub async fn fail_item(&self, id: Uuid, error: &str) -> Result<()> {
        self.store
            .set_status(id, WorkStatus::Failed, Some(error))
            .await?;
        {
            let mut items = self.items.write().await;
            if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                item.status = WorkStatus::Failed;
                item.error_message = Some(error.to_string());
            }
        }
        self.clear_current(id).await;
        self.notify_observers().await;
        Ok(())
    }

    /// Re-queue an item for another attempt after a retryable failure.
    pub async fn requeue_item(&self, id: Uuid, retry_count: i32, error: &str) -> Result<()> {
        self.store.mark_retry(id, retry_count, error).await?;
        {
            let mut items = self.items.write().await;
            if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                item.status = WorkStatus::Pending;
                item.progress = 0;
                item.retry_count = retry_count;
                item.error_message = Some(error.to_string());
            }
        }
        self.clear_current(id).await;
        self.notify_observers().await;
        self.wake.notify_waiters();
        Ok(())
    }

    /// Mirror the dispatch loop's running flag into snapshots.
    pub async fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
        self.notify_observers().await;
    }

    async fn clear_current(&self, id: Uuid) {
        let mut current = self.current_item.lock().await;
        if *current == Some(id) {
            *current = None;
        }
    }

    async fn reload(&self) -> Result<()> {
        let loaded: Vec<WorkItem> = self
            .store
            .load_all()
            .await?
            .into_iter()
            .filter(|item| item.status != WorkStatus::Completed)
            .collect();
        *self.items.write().await = loaded;
        self.notify_observers().await;
        Ok(())
    }

    async fn notify_observers(&self) {
        let snapshot = self.snapshot().await;
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer.on_update(&snapshot);
            observer.on_persist();
        }
    }
}
