//! Integration tests for the queue manager against the in-memory store.

use std::sync::{Arc, Mutex};

use sift_core::{IgnoreRules, QueueSnapshot, WorkItem, WorkItemKind, WorkItemStore, WorkStatus};
use sift_db::MemoryWorkItemStore;
use sift_dispatch::{EnqueueCandidate, QueueManager, QueueObserver};

fn manager() -> (Arc<QueueManager>, Arc<MemoryWorkItemStore>) {
    let store = Arc::new(MemoryWorkItemStore::new());
    let queue = Arc::new(QueueManager::new(store.clone()));
    (queue, store)
}

fn permissive() -> IgnoreRules {
    IgnoreRules::permissive()
}

#[derive(Default)]
struct RecordingObserver {
    snapshots: Mutex<Vec<QueueSnapshot>>,
}

impl QueueObserver for RecordingObserver {
    fn on_update(&self, snapshot: &QueueSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

#[tokio::test]
async fn enqueue_same_path_twice_yields_one_item() {
    let (queue, _) = manager();

    let added = queue
        .enqueue(
            vec![EnqueueCandidate::file("/docs/a.txt", 10)],
            false,
            &permissive(),
        )
        .await
        .unwrap();
    assert_eq!(added, 1);

    let added = queue
        .enqueue(
            vec![EnqueueCandidate::file("/docs/a.txt", 10)],
            false,
            &permissive(),
        )
        .await
        .unwrap();
    assert_eq!(added, 0);

    assert_eq!(queue.snapshot().await.items.len(), 1);
}

#[tokio::test]
async fn duplicate_paths_within_one_batch_dedup() {
    let (queue, _) = manager();

    let added = queue
        .enqueue(
            vec![
                EnqueueCandidate::file("/docs/a.txt", 10),
                EnqueueCandidate::file("/docs/a.txt", 10),
                EnqueueCandidate::file("/docs/b.txt", 10),
            ],
            false,
            &permissive(),
        )
        .await
        .unwrap();
    assert_eq!(added, 2);
}

#[tokio::test]
async fn force_reanalyze_resets_existing_instead_of_duplicating() {
    let (queue, store) = manager();

    queue
        .enqueue(
            vec![EnqueueCandidate::file("/docs/a.txt", 10)],
            false,
            &permissive(),
        )
        .await
        .unwrap();
    let id = queue.snapshot().await.items[0].id;

    // Simulate a completed run
    queue.begin_analysis(id).await.unwrap();
    queue.complete_item(id).await.unwrap();
    assert_eq!(
        queue.snapshot().await.items[0].status,
        WorkStatus::Completed
    );

    let added = queue
        .enqueue(
            vec![EnqueueCandidate::file("/docs/a.txt", 10)],
            true,
            &permissive(),
        )
        .await
        .unwrap();
    assert_eq!(added, 1);

    let snapshot = queue.snapshot().await;
    assert_eq!(snapshot.items.len(), 1, "no duplicate created");
    assert_eq!(snapshot.items[0].id, id);
    assert_eq!(snapshot.items[0].status, WorkStatus::Pending);
    assert_eq!(snapshot.items[0].progress, 0);

    // Persisted state agrees
    let persisted = store.get(id).await.unwrap().unwrap();
    assert_eq!(persisted.status, WorkStatus::Pending);
}

#[tokio::test]
async fn ignore_rules_filter_candidates() {
    let (queue, _) = manager();

    let added = queue
        .enqueue(
            vec![
                EnqueueCandidate::file("/docs/.DS_Store", 1),
                EnqueueCandidate::file("/docs/notes.txt", 1),
            ],
            false,
            &IgnoreRules::default(),
        )
        .await
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(queue.snapshot().await.items[0].name, "notes.txt");
}

#[tokio::test]
async fn load_from_store_recovers_orphaned_analyzing() {
    let mut orphan = WorkItem::new("/docs/orphan.txt", WorkItemKind::File, 5);
    orphan.status = WorkStatus::Analyzing;
    orphan.progress = 70;
    let mut done = WorkItem::new("/docs/done.txt", WorkItemKind::File, 5);
    done.status = WorkStatus::Completed;
    let store = Arc::new(MemoryWorkItemStore::seeded(vec![orphan, done]));
    let queue = QueueManager::new(store);

    let loaded = queue.load_from_store().await.unwrap();
    // Completed items are excluded from the hydrated view
    assert_eq!(loaded, 1);

    let snapshot = queue.snapshot().await;
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].status, WorkStatus::Pending);
    assert_eq!(snapshot.items[0].progress, 0);
}

#[tokio::test]
async fn retry_failed_bulk_transitions_to_pending() {
    let (queue, _) = manager();

    queue
        .enqueue(
            vec![
                EnqueueCandidate::file("/a.txt", 1),
                EnqueueCandidate::file("/b.txt", 1),
            ],
            false,
            &permissive(),
        )
        .await
        .unwrap();

    let ids: Vec<_> = queue.snapshot().await.items.iter().map(|i| i.id).collect();
    for id in &ids {
        queue.begin_analysis(*id).await.unwrap();
        queue.fail_item(*id, "boom").await.unwrap();
    }
    assert_eq!(queue.stats().await.failed, 2);

    let retried = queue.retry_failed().await.unwrap();
    assert_eq!(retried, 2);
    let stats = queue.stats().await;
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 2);
}

#[tokio::test]
async fn clear_pending_leaves_only_completed() {
    let (queue, store) = manager();

    queue
        .enqueue(
            vec![
                EnqueueCandidate::file("/a.txt", 1),
                EnqueueCandidate::file("/b.txt", 1),
                EnqueueCandidate::file("/c.txt", 1),
            ],
            false,
            &permissive(),
        )
        .await
        .unwrap();

    let id = queue.snapshot().await.items[0].id;
    queue.begin_analysis(id).await.unwrap();
    queue.complete_item(id).await.unwrap();

    let removed = queue.clear_pending().await.unwrap();
    assert_eq!(removed, 2);

    let snapshot = queue.snapshot().await;
    assert_eq!(snapshot.items.len(), 1);
    assert!(snapshot
        .items
        .iter()
        .all(|i| i.status == WorkStatus::Completed));

    // Storage agrees
    let persisted = store.load_all().await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].status, WorkStatus::Completed);
}

#[tokio::test]
async fn at_most_one_item_analyzing() {
    let (queue, _) = manager();

    queue
        .enqueue(
            vec![
                EnqueueCandidate::file("/a.txt", 1),
                EnqueueCandidate::file("/b.txt", 1),
            ],
            false,
            &permissive(),
        )
        .await
        .unwrap();

    let ids: Vec<_> = queue.snapshot().await.items.iter().map(|i| i.id).collect();
    queue.begin_analysis(ids[0]).await.unwrap();
    let err = queue.begin_analysis(ids[1]).await;
    assert!(err.is_err(), "second concurrent analysis must be refused");

    queue.complete_item(ids[0]).await.unwrap();
    queue.begin_analysis(ids[1]).await.unwrap();
}

#[tokio::test]
async fn progress_is_monotonic_within_attempt() {
    let (queue, _) = manager();
    queue
        .enqueue(vec![EnqueueCandidate::file("/a.txt", 1)], false, &permissive())
        .await
        .unwrap();
    let id = queue.snapshot().await.items[0].id;
    queue.begin_analysis(id).await.unwrap();

    queue.set_progress(id, 50).await.unwrap();
    queue.set_progress(id, 30).await.unwrap();
    assert_eq!(queue.snapshot().await.items[0].progress, 50);

    queue.set_progress(id, 90).await.unwrap();
    assert_eq!(queue.snapshot().await.items[0].progress, 90);
}

#[tokio::test]
async fn failed_enqueue_transaction_resyncs_from_store() {
    let (queue, store) = manager();

    queue
        .enqueue(vec![EnqueueCandidate::file("/a.txt", 1)], false, &permissive())
        .await
        .unwrap();

    store.fail_next_enqueue();
    let err = queue
        .enqueue(vec![EnqueueCandidate::file("/b.txt", 1)], false, &permissive())
        .await;
    assert!(err.is_err());

    // In-memory view matches storage: only the first item exists.
    let snapshot = queue.snapshot().await;
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].path, "/a.txt");
    assert_eq!(store.load_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn validate_consistency_storage_wins() {
    let (queue, store) = manager();

    queue
        .enqueue(
            vec![
                EnqueueCandidate::file("/a.txt", 1),
                EnqueueCandidate::file("/b.txt", 1),
            ],
            false,
            &permissive(),
        )
        .await
        .unwrap();
    let ids: Vec<_> = queue.snapshot().await.items.iter().map(|i| i.id).collect();

    // Mutate storage behind the manager's back: delete one, fail the other,
    // and insert a brand-new pending row.
    store.delete(ids[0]).await.unwrap();
    store
        .set_status(ids[1], WorkStatus::Failed, Some("external"))
        .await
        .unwrap();
    let external = WorkItem::new("/c.txt", WorkItemKind::File, 1);
    store.put(external.clone());

    let report = queue.validate_consistency().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.corrected, 1);
    assert_eq!(report.restored, 1);

    let snapshot = queue.snapshot().await;
    assert_eq!(snapshot.items.len(), 2);
    let b = snapshot.items.iter().find(|i| i.path == "/b.txt").unwrap();
    assert_eq!(b.status, WorkStatus::Failed);
    assert!(snapshot.items.iter().any(|i| i.path == "/c.txt"));

    // A second pass reports clean.
    let report = queue.validate_consistency().await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn observers_receive_snapshots() {
    let (queue, _) = manager();
    let observer = Arc::new(RecordingObserver::default());
    queue.add_observer(observer.clone());

    queue
        .enqueue(vec![EnqueueCandidate::file("/a.txt", 1)], false, &permissive())
        .await
        .unwrap();
    let id = queue.snapshot().await.items[0].id;
    queue.begin_analysis(id).await.unwrap();
    queue.complete_item(id).await.unwrap();

    let snapshots = observer.snapshots.lock().unwrap();
    assert!(snapshots.len() >= 3);
    // The analyzing-phase snapshot carries the current item id.
    assert!(snapshots
        .iter()
        .any(|s| s.current_item_id == Some(id)));
    // The final snapshot shows the completed item.
    let last = snapshots.last().unwrap();
    assert_eq!(last.items[0].status, WorkStatus::Completed);
}

#[tokio::test]
async fn wake_handle_signals_on_enqueue() {
    let (queue, _) = manager();
    let wake = queue.wake_handle();

    let waiter = tokio::spawn(async move {
        wake.notified().await;
    });
    // Give the waiter time to park before enqueueing.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    queue
        .enqueue(vec![EnqueueCandidate::file("/a.txt", 1)], false, &permissive())
        .await
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
        .await
        .expect("wake signal must fire")
        .unwrap();
}

#[tokio::test]
async fn delete_item_removes_from_memory_and_store() {
    let (queue, store) = manager();
    queue
        .enqueue(vec![EnqueueCandidate::file("/a.txt", 1)], false, &permissive())
        .await
        .unwrap();
    let id = queue.snapshot().await.items[0].id;

    queue.delete_item(id).await.unwrap();
    assert!(queue.snapshot().await.items.is_empty());
    assert!(store.get(id).await.unwrap().is_none());
}
