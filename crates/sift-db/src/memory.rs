//! In-memory store implementations (feature `memory`).
//!
//! Used by the dispatch and queue tests, and by ephemeral deployments that
//! do not need durability. Behavior mirrors the PostgreSQL stores, including
//! all-or-nothing enqueue batches. `MemoryWorkItemStore` supports one-shot
//! failure injection so callers can exercise the reload-on-transaction-error
//! path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use sift_core::{
    AnalysisRecord, AnalysisStore, Error, RemoteAnalysisCache, Result, Unit, WorkItem,
    WorkItemStore, WorkStatus,
};

/// In-memory implementation of [`WorkItemStore`].
///
/// Items are keyed by UUIDv7 id, so iteration order is enqueue order.
#[derive(Default)]
pub struct MemoryWorkItemStore {
    items: Mutex<BTreeMap<Uuid, WorkItem>>,
    fail_next_enqueue: AtomicBool,
}

impl MemoryWorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-existing items (e.g. to simulate state left
    /// behind by a previous process run).
    pub fn seeded(items: Vec<WorkItem>) -> Self {
        let store = Self::new();
        {
            let mut map = store.items.lock().unwrap();
            for item in items {
                map.insert(item.id, item);
            }
        }
        store
    }

    /// Make the next `apply_enqueue` call fail without applying anything.
    pub fn fail_next_enqueue(&self) {
        self.fail_next_enqueue.store(true, Ordering::SeqCst);
    }

    /// Direct row mutation bypassing the trait, for test setup.
    pub fn put(&self, item: WorkItem) {
        self.items.lock().unwrap().insert(item.id, item);
    }
}

#[async_trait]
impl WorkItemStore for MemoryWorkItemStore {
    async fn load_all(&self) -> Result<Vec<WorkItem>> {
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>> {
        Ok(self.items.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<WorkItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .find(|i| i.path == path)
            .cloned())
    }

    async fn apply_enqueue(&self, inserts: &[WorkItem], resets: &[Uuid]) -> Result<()> {
        if self.fail_next_enqueue.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal("injected transaction failure".into()));
        }

        let mut items = self.items.lock().unwrap();
        let now = Utc::now();

        for item in inserts {
            items.insert(item.id, item.clone());
        }
        for id in resets {
            if let Some(item) = items.get_mut(id) {
                item.status = WorkStatus::Pending;
                item.progress = 0;
                item.error_message = None;
                item.updated_at = now;
            }
        }
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: WorkStatus, error: Option<&str>) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.status = status;
            item.error_message = error.map(String::from);
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.progress = progress;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_retry(&self, id: Uuid, retry_count: i32, error: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.status = WorkStatus::Pending;
            item.progress = 0;
            item.retry_count = retry_count;
            item.error_message = Some(error.to_string());
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reset_to_pending(&self, ids: &[Uuid]) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let now = Utc::now();
        for id in ids {
            if let Some(item) = items.get_mut(id) {
                item.status = WorkStatus::Pending;
                item.progress = 0;
                item.updated_at = now;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.items.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn delete_not_completed(&self) -> Result<i64> {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|_, item| item.status == WorkStatus::Completed);
        Ok((before - items.len()) as i64)
    }

    async fn reset_orphaned_analyzing(&self) -> Result<i64> {
        let mut items = self.items.lock().unwrap();
        let mut reset = 0;
        let now = Utc::now();
        for item in items.values_mut() {
            if item.status == WorkStatus::Analyzing {
                item.status = WorkStatus::Pending;
                item.progress = 0;
                item.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

/// In-memory implementation of [`AnalysisStore`].
#[derive(Default)]
pub struct MemoryAnalysisStore {
    by_hash: Mutex<HashMap<String, AnalysisRecord>>,
    analyzed_paths: Mutex<HashSet<String>>,
    units: Mutex<Vec<Unit>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted analysis records.
    pub fn record_count(&self) -> usize {
        self.by_hash.lock().unwrap().len()
    }

    /// Persisted unit records.
    pub fn units(&self) -> Vec<Unit> {
        self.units.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn lookup_by_hash(&self, content_hash: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.by_hash.lock().unwrap().get(content_hash).cloned())
    }

    async fn is_path_analyzed(&self, path: &str) -> Result<bool> {
        Ok(self.analyzed_paths.lock().unwrap().contains(path))
    }

    async fn persist(&self, record: &AnalysisRecord) -> Result<()> {
        self.by_hash
            .lock()
            .unwrap()
            .insert(record.content_hash.clone(), record.clone());
        self.analyzed_paths
            .lock()
            .unwrap()
            .insert(record.path.clone());
        Ok(())
    }

    async fn persist_unit(&self, unit: &Unit) -> Result<()> {
        self.units.lock().unwrap().push(unit.clone());
        Ok(())
    }
}

/// A remote cache view over a [`MemoryAnalysisStore`], for tests that need
/// the local-miss/remote-hit path.
pub struct MemoryRemoteCache(pub std::sync::Arc<MemoryAnalysisStore>);

#[async_trait]
impl RemoteAnalysisCache for MemoryRemoteCache {
    async fn lookup(&self, content_hash: &str) -> Result<Option<AnalysisRecord>> {
        self.0.lookup_by_hash(content_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::WorkItemKind;

    #[tokio::test]
    async fn test_apply_enqueue_and_load() {
        let store = MemoryWorkItemStore::new();
        let a = WorkItem::new("/a.txt", WorkItemKind::File, 1);
        let b = WorkItem::new("/b.txt", WorkItemKind::File, 2);

        store.apply_enqueue(&[a.clone(), b.clone()], &[]).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        // BTreeMap over v7 ids preserves enqueue order
        assert_eq!(all[0].path, "/a.txt");
        assert_eq!(all[1].path, "/b.txt");
    }

    #[tokio::test]
    async fn test_injected_failure_applies_nothing() {
        let store = MemoryWorkItemStore::new();
        store.fail_next_enqueue();

        let item = WorkItem::new("/a.txt", WorkItemKind::File, 1);
        let err = store.apply_enqueue(&[item], &[]).await;
        assert!(err.is_err());
        assert!(store.load_all().await.unwrap().is_empty());

        // Next call succeeds again
        let item = WorkItem::new("/b.txt", WorkItemKind::File, 1);
        store.apply_enqueue(&[item], &[]).await.unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_orphaned_analyzing() {
        let mut item = WorkItem::new("/a.txt", WorkItemKind::File, 1);
        item.status = WorkStatus::Analyzing;
        item.progress = 40;
        let store = MemoryWorkItemStore::seeded(vec![item]);

        let reset = store.reset_orphaned_analyzing().await.unwrap();
        assert_eq!(reset, 1);

        let all = store.load_all().await.unwrap();
        assert_eq!(all[0].status, WorkStatus::Pending);
        assert_eq!(all[0].progress, 0);
    }

    #[tokio::test]
    async fn test_delete_not_completed_keeps_completed() {
        let mut done = WorkItem::new("/done.txt", WorkItemKind::File, 1);
        done.status = WorkStatus::Completed;
        let pending = WorkItem::new("/pending.txt", WorkItemKind::File, 1);
        let mut failed = WorkItem::new("/failed.txt", WorkItemKind::File, 1);
        failed.status = WorkStatus::Failed;

        let store = MemoryWorkItemStore::seeded(vec![done, pending, failed]);
        let removed = store.delete_not_completed().await.unwrap();
        assert_eq!(removed, 2);

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].path, "/done.txt");
    }

    #[tokio::test]
    async fn test_analysis_store_hash_and_path() {
        let store = MemoryAnalysisStore::new();
        let mut rec = AnalysisRecord::new("hash1", "/a.txt");
        rec.tags = vec!["report".into()];
        store.persist(&rec).await.unwrap();

        assert!(store.is_path_analyzed("/a.txt").await.unwrap());
        assert!(!store.is_path_analyzed("/b.txt").await.unwrap());

        let hit = store.lookup_by_hash("hash1").await.unwrap().unwrap();
        assert_eq!(hit.tags, vec!["report".to_string()]);
        assert!(store.lookup_by_hash("hash2").await.unwrap().is_none());
    }
}
