use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::debug;

use crate::paths::StorePath;
use crate::store::{
    prune, RealtimeStore, Revision, StoreError, StoreResult, Subscription, TransactionOutcome,
};
use crate::tree::{get_at, set_at};

/// In-process realtime store: a JSON tree with per-path revisions and change feeds.
///
/// Used as the local development backend and as the test double for every crate
/// above this one. `set_online(false)` and `set_write_latency` simulate the
/// network failures the sync engine has to survive.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<TreeState>,
    changes: broadcast::Sender<StorePath>,
    online: AtomicBool,
    write_latency_ms: AtomicU64,
    writes: AtomicU64,
}

struct TreeState {
    root: Value,
    /// Last write anywhere at or below each path.
    subtree: HashMap<StorePath, u64>,
    /// Last write that replaced each path wholesale.
    exact: HashMap<StorePath, u64>,
    generation: u64,
}

impl TreeState {
    /// Generation of the last write that could have changed the value at `path`:
    /// one at or below it, or one that replaced an ancestor. Writes to siblings
    /// only touch the shared ancestor's subtree counter and never count here.
    fn revision_of(&self, path: &StorePath) -> u64 {
        let replaced_above = path
            .lineage()
            .iter()
            .filter(|p| *p != path)
            .filter_map(|p| self.exact.get(p).copied())
            .max()
            .unwrap_or(0);
        self.subtree.get(path).copied().unwrap_or(0).max(replaced_above)
    }

    fn apply(&mut self, path: &StorePath, value: Value) {
        set_at(&mut self.root, path.segments(), prune(value));
        self.generation += 1;
        let generation = self.generation;
        for ancestor in path.lineage() {
            self.subtree.insert(ancestor, generation);
        }
        self.exact.insert(path.clone(), generation);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(TreeState {
                    root: Value::Object(Map::new()),
                    subtree: HashMap::new(),
                    exact: HashMap::new(),
                    generation: 0,
                }),
                changes,
                online: AtomicBool::new(true),
                write_latency_ms: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        debug!("MemoryStore online={}", online);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Delay applied before every mutating call.
    pub fn set_write_latency(&self, latency: Duration) {
        self.inner
            .write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of committed mutating calls.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("network unreachable".into()))
        }
    }

    async fn simulate_latency(&self) -> StoreResult<()> {
        let latency = self.inner.write_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.ensure_online()
    }

    fn committed(&self, paths: Vec<StorePath>) {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        for path in paths {
            // No receivers is fine.
            let _ = self.inner.changes.send(path);
        }
    }

    async fn snapshot(inner: &Inner, path: &StorePath) -> Option<Value> {
        let state = inner.state.read().await;
        get_at(&state.root, path.segments()).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.ensure_online()?;
        Ok(Self::snapshot(&self.inner, path).await)
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.ensure_online()?;
        self.simulate_latency().await?;
        self.inner.state.write().await.apply(path, value);
        self.committed(vec![path.clone()]);
        Ok(())
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> StoreResult<()> {
        self.ensure_online()?;
        let children = fields
            .into_iter()
            .map(|(key, value)| Ok((path.child(&key)?, value)))
            .collect::<StoreResult<Vec<_>>>()?;
        self.simulate_latency().await?;

        let mut state = self.inner.state.write().await;
        let mut touched = Vec::with_capacity(children.len());
        for (child, value) in children {
            state.apply(&child, value);
            touched.push(child);
        }
        drop(state);

        self.committed(touched);
        Ok(())
    }

    async fn read_versioned(&self, path: &StorePath) -> StoreResult<(Option<Value>, Revision)> {
        self.ensure_online()?;
        let state = self.inner.state.read().await;
        let value = get_at(&state.root, path.segments()).cloned();
        Ok((value, Revision(vec![state.revision_of(path)])))
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: &Revision,
        value: Value,
    ) -> StoreResult<bool> {
        self.ensure_online()?;
        self.simulate_latency().await?;

        let mut state = self.inner.state.write().await;
        if Revision(vec![state.revision_of(path)]) != *expected {
            return Ok(false);
        }
        state.apply(path, value);
        drop(state);

        self.committed(vec![path.clone()]);
        Ok(true)
    }

    /// Read, compute and write under one lock, so concurrent transactions on the
    /// same path serialize instead of racing.
    async fn transaction(
        &self,
        path: &StorePath,
        update: &(dyn for<'v> Fn(Option<&'v Value>) -> Option<Value> + Send + Sync),
    ) -> StoreResult<TransactionOutcome> {
        self.ensure_online()?;
        self.simulate_latency().await?;

        let mut state = self.inner.state.write().await;
        let current = get_at(&state.root, path.segments()).cloned();
        let Some(next) = update(current.as_ref()) else {
            return Ok(TransactionOutcome {
                committed: false,
                snapshot: current,
            });
        };
        state.apply(path, next);
        let snapshot = get_at(&state.root, path.segments()).cloned();
        drop(state);

        self.committed(vec![path.clone()]);
        Ok(TransactionOutcome {
            committed: true,
            snapshot,
        })
    }

    async fn watch(&self, path: &StorePath) -> StoreResult<Subscription> {
        self.ensure_online()?;
        let mut changes = self.inner.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let watched = path.clone();

        let task = tokio::spawn(async move {
            let mut last = MemoryStore::snapshot(&inner, &watched).await;
            if tx.send(last.clone()).is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if !changed.overlaps(&watched) => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let current = MemoryStore::snapshot(&inner, &watched).await;
                        if current != last {
                            if tx.send(current.clone()).is_err() {
                                return;
                            }
                            last = current;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}
