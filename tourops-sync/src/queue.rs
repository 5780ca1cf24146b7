use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tourops_shared::QueueCounts;
use tracing::{debug, info, warn};

use crate::action::{ActionStatus, ActionUpdate, QueuedAction};
use crate::{QueueError, QueueResult};

/// Durable backing for the offline queue. Rows are keyed by action id.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn load_all(&self) -> QueueResult<Vec<QueuedAction>>;
    async fn upsert(&self, action: &QueuedAction) -> QueueResult<()>;
    async fn remove(&self, ids: &[String]) -> QueueResult<()>;
}

/// Non-durable storage for tests and the local development profile.
#[derive(Default)]
pub struct MemoryQueueStorage {
    rows: std::sync::Mutex<HashMap<String, QueuedAction>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows as if left behind by an earlier process.
    pub fn with_rows(rows: Vec<QueuedAction>) -> Self {
        let storage = Self::default();
        if let Ok(mut map) = storage.rows.lock() {
            map.extend(rows.into_iter().map(|row| (row.id.clone(), row)));
        }
        storage
    }

    /// Make every subsequent write fail, as a full disk would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn rows(&self) -> QueueResult<std::sync::MutexGuard<'_, HashMap<String, QueuedAction>>> {
        self.rows
            .lock()
            .map_err(|_| QueueError::Persistence("queue storage lock poisoned".into()))
    }

    fn check_writable(&self) -> QueueResult<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(QueueError::Persistence("storage rejected write".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStorage for MemoryQueueStorage {
    async fn load_all(&self) -> QueueResult<Vec<QueuedAction>> {
        Ok(self.rows()?.values().cloned().collect())
    }

    async fn upsert(&self, action: &QueuedAction) -> QueueResult<()> {
        self.check_writable()?;
        self.rows()?.insert(action.id.clone(), action.clone());
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> QueueResult<()> {
        self.check_writable()?;
        let mut rows = self.rows()?;
        for id in ids {
            rows.remove(id);
        }
        Ok(())
    }
}

/// Durable list of unconfirmed mutations, owned by one sync engine.
///
/// Every change is written through to [`QueueStorage`] before the in-memory view
/// is updated, so a failed write leaves both sides unchanged.
pub struct OfflineActionQueue {
    storage: Arc<dyn QueueStorage>,
    entries: Mutex<Entries>,
    counts: watch::Sender<QueueCounts>,
}

struct Entries {
    by_id: HashMap<String, QueuedAction>,
    next_seq: u64,
}

impl Entries {
    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for action in self.by_id.values() {
            match action.status {
                ActionStatus::Queued => counts.pending += 1,
                ActionStatus::Syncing => counts.syncing += 1,
                ActionStatus::Failed => counts.failed += 1,
                ActionStatus::Synced => {}
            }
        }
        counts.total = counts.pending + counts.syncing + counts.failed;
        counts
    }
}

impl OfflineActionQueue {
    /// Load persisted entries. Anything left `syncing` by a previous process is re-queued.
    pub async fn open(storage: Arc<dyn QueueStorage>) -> QueueResult<Self> {
        let mut by_id = HashMap::new();
        let mut next_seq = 1;

        for mut action in storage.load_all().await? {
            if action.status == ActionStatus::Syncing {
                warn!("Action {} was interrupted mid-sync, re-queueing", action.id);
                action.status = ActionStatus::Queued;
                action.updated_at = Utc::now();
                storage.upsert(&action).await?;
            }
            next_seq = next_seq.max(action.seq + 1);
            by_id.insert(action.id.clone(), action);
        }

        let entries = Entries { by_id, next_seq };
        let (counts, _) = watch::channel(entries.counts());
        info!("Offline queue opened with {} entries", entries.by_id.len());

        Ok(Self {
            storage,
            entries: Mutex::new(entries),
            counts,
        })
    }

    /// Insert or replace by id. A replaced entry keeps its attempts and position.
    pub async fn enqueue(&self, mut action: QueuedAction) -> QueueResult<QueuedAction> {
        let mut entries = self.entries.lock().await;

        match entries.by_id.get(&action.id) {
            Some(existing) => {
                action.seq = existing.seq;
                action.attempts = existing.attempts;
                action.created_at = existing.created_at;
                if action.last_error.is_none() {
                    action.last_error = existing.last_error.clone();
                }
            }
            None => action.seq = entries.next_seq,
        }
        action.status = ActionStatus::Queued;
        action.next_attempt_at = None;
        action.updated_at = Utc::now();

        self.storage.upsert(&action).await?;
        if action.seq == entries.next_seq {
            entries.next_seq += 1;
        }
        entries.by_id.insert(action.id.clone(), action.clone());
        debug!("Enqueued {} ({}) at position {}", action.id, action.action_type, action.seq);

        self.publish(&entries);
        Ok(action)
    }

    /// All entries in enqueue order.
    pub async fn list(&self) -> Vec<QueuedAction> {
        let entries = self.entries.lock().await;
        let mut actions: Vec<QueuedAction> = entries.by_id.values().cloned().collect();
        actions.sort_by_key(|a| a.seq);
        actions
    }

    pub async fn get(&self, id: &str) -> Option<QueuedAction> {
        self.entries.lock().await.by_id.get(id).cloned()
    }

    pub async fn update_status(&self, id: &str, update: ActionUpdate) -> QueueResult<QueuedAction> {
        let mut entries = self.entries.lock().await;
        let mut action = entries
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        update.apply_to(&mut action);
        self.storage.upsert(&action).await?;
        entries.by_id.insert(action.id.clone(), action.clone());

        self.publish(&entries);
        Ok(action)
    }

    /// Settle a claimed entry in memory only, after storage refused the write.
    ///
    /// The stored row stays `syncing` and is re-queued by the next `open`, so the
    /// two views converge on restart. Until then the entry is retried like any
    /// other failure instead of being reported busy forever.
    pub async fn release(&self, id: &str, update: ActionUpdate) -> Option<QueuedAction> {
        let mut entries = self.entries.lock().await;
        let action = entries.by_id.get_mut(id)?;
        update.apply_to(action);
        let action = action.clone();
        warn!("Released {} as {} without persisting", id, action.status);

        self.publish(&entries);
        Some(action)
    }

    /// Move a `queued`/`failed` entry to `syncing`. `None` if it is not claimable.
    pub async fn claim(&self, id: &str) -> QueueResult<Option<QueuedAction>> {
        let mut entries = self.entries.lock().await;
        let Some(current) = entries.by_id.get(id) else {
            return Ok(None);
        };
        if !current.status.is_replayable() {
            return Ok(None);
        }

        let mut action = current.clone();
        action.status = ActionStatus::Syncing;
        action.updated_at = Utc::now();
        self.storage.upsert(&action).await?;
        entries.by_id.insert(action.id.clone(), action.clone());

        self.publish(&entries);
        Ok(Some(action))
    }

    /// Clear back-off on every failed entry. Returns how many were re-queued.
    pub async fn retry_failed_now(&self) -> QueueResult<usize> {
        let mut entries = self.entries.lock().await;
        let failed: Vec<QueuedAction> = entries
            .by_id
            .values()
            .filter(|a| a.status == ActionStatus::Failed)
            .cloned()
            .collect();

        for mut action in failed.iter().cloned() {
            action.status = ActionStatus::Queued;
            action.next_attempt_at = None;
            action.updated_at = Utc::now();
            self.storage.upsert(&action).await?;
            entries.by_id.insert(action.id.clone(), action);
        }

        if !failed.is_empty() {
            info!("Re-queued {} failed actions", failed.len());
            self.publish(&entries);
        }
        Ok(failed.len())
    }

    /// Drop synced entries last touched more than `retention` ago.
    pub async fn prune_synced(&self, retention: Duration) -> QueueResult<usize> {
        let mut entries = self.entries.lock().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(3650));
        let expired: Vec<String> = entries
            .by_id
            .values()
            .filter(|a| a.status == ActionStatus::Synced && a.updated_at <= cutoff)
            .map(|a| a.id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }
        self.storage.remove(&expired).await?;
        for id in &expired {
            entries.by_id.remove(id);
        }
        debug!("Pruned {} synced actions", expired.len());
        Ok(expired.len())
    }

    pub fn counts(&self) -> QueueCounts {
        *self.counts.borrow()
    }

    /// Receiver that wakes whenever the aggregate counts change.
    pub fn watch_counts(&self) -> watch::Receiver<QueueCounts> {
        self.counts.subscribe()
    }

    /// Call `callback` with the current counts and again after every change.
    pub fn subscribe<F>(&self, callback: F) -> QueueSubscription
    where
        F: Fn(QueueCounts) + Send + Sync + 'static,
    {
        let mut rx = self.counts.subscribe();
        let task = tokio::spawn(async move {
            loop {
                let counts = *rx.borrow_and_update();
                callback(counts);
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
        QueueSubscription { task: Some(task) }
    }

    fn publish(&self, entries: &Entries) {
        let counts = entries.counts();
        self.counts.send_if_modified(|current| {
            if *current == counts {
                false
            } else {
                *current = counts;
                true
            }
        });
    }
}

/// Handle for a queue-state callback; the callback stops when this is unsubscribed or dropped.
pub struct QueueSubscription {
    task: Option<JoinHandle<()>>,
}

impl QueueSubscription {
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MANIFEST_UPDATE;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn action(id: &str) -> QueuedAction {
        QueuedAction::new(id, MANIFEST_UPDATE, "T1", json!({"id": id}))
    }

    async fn queue() -> (Arc<MemoryQueueStorage>, OfflineActionQueue) {
        let storage = Arc::new(MemoryQueueStorage::new());
        let queue = OfflineActionQueue::open(storage.clone()).await.unwrap();
        (storage, queue)
    }

    #[tokio::test]
    async fn test_enqueue_orders_and_dedupes() {
        let (storage, queue) = queue().await;
        queue.enqueue(action("a")).await.unwrap();
        queue.enqueue(action("b")).await.unwrap();
        queue
            .update_status("a", ActionUpdate::failed(3, "offline", Utc::now()))
            .await
            .unwrap();

        let replaced = queue.enqueue(action("a").with_last_error("timeout")).await.unwrap();
        assert_eq!(replaced.attempts, 3);
        assert_eq!(replaced.status, ActionStatus::Queued);
        assert_eq!(replaced.last_error.as_deref(), Some("timeout"));

        let ids: Vec<String> = queue.list().await.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(storage.load_all().await.unwrap().len(), 2);
        assert_eq!(queue.counts(), QueueCounts { pending: 2, syncing: 0, failed: 0, total: 2 });
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (_, queue) = queue().await;
        queue.enqueue(action("a")).await.unwrap();

        assert!(queue.claim("a").await.unwrap().is_some());
        assert!(queue.claim("a").await.unwrap().is_none());
        assert!(queue.claim("missing").await.unwrap().is_none());
        assert_eq!(queue.counts().syncing, 1);
    }

    #[tokio::test]
    async fn test_open_requeues_interrupted_sync() {
        let mut stuck = action("a");
        stuck.status = ActionStatus::Syncing;
        stuck.seq = 7;
        let storage = Arc::new(MemoryQueueStorage::with_rows(vec![stuck]));

        let queue = OfflineActionQueue::open(storage.clone()).await.unwrap();
        assert_eq!(queue.get("a").await.unwrap().status, ActionStatus::Queued);
        assert_eq!(storage.load_all().await.unwrap()[0].status, ActionStatus::Queued);

        let next = queue.enqueue(action("b")).await.unwrap();
        assert_eq!(next.seq, 8);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_queue_unchanged() {
        let (storage, queue) = queue().await;
        storage.fail_writes(true);

        let err = queue.enqueue(action("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::Persistence(_)));
        assert!(queue.list().await.is_empty());
        assert_eq!(queue.counts().total, 0);
    }

    #[tokio::test]
    async fn test_retry_failed_and_prune() {
        let (_, queue) = queue().await;
        queue.enqueue(action("a")).await.unwrap();
        queue.enqueue(action("b")).await.unwrap();
        queue
            .update_status("a", ActionUpdate::failed(1, "offline", Utc::now() + chrono::Duration::minutes(5)))
            .await
            .unwrap();
        queue.update_status("b", ActionUpdate::synced()).await.unwrap();

        assert_eq!(queue.retry_failed_now().await.unwrap(), 1);
        let a = queue.get("a").await.unwrap();
        assert_eq!(a.status, ActionStatus::Queued);
        assert_eq!(a.next_attempt_at, None);

        assert_eq!(queue.prune_synced(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.prune_synced(Duration::ZERO).await.unwrap(), 1);
        assert!(queue.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_reports_counts_until_unsubscribed() {
        let (_, queue) = queue().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = queue.subscribe(move |counts| sink.lock().unwrap().push(counts.total));

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(action("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.unsubscribe();

        queue.enqueue(action("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&1));
    }
}
