use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::paths::StorePath;
use crate::CoreError;

/// Optimistic transactions give up after this many lost races.
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 25;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("transaction on {path} lost {attempts} races")]
    TransactionContention { path: String, attempts: u32 },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::Timeout(_)
                | StoreError::TransactionContention { .. }
                | StoreError::Backend(_)
        )
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => StoreError::InvalidPath(msg),
            CoreError::InternalError(msg) => StoreError::Backend(msg),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Opaque version token returned by `read_versioned` and checked by `compare_and_set`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Revision(pub Vec<u64>);

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub committed: bool,
    /// Value at the path after the transaction (the unchanged value when aborted).
    pub snapshot: Option<Value>,
}

/// Live view of a store path. Dropping the handle also unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Option<Value>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Value>>, task: JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    /// Next observed value; `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Key-path access to the realtime backing store.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    /// Replace the value at `path`. Writing `Value::Null` deletes it.
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Replace only the named children of `path`.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> StoreResult<()>;

    async fn read_versioned(&self, path: &StorePath) -> StoreResult<(Option<Value>, Revision)>;

    /// Write `value` only if nothing overlapping `path` changed since `expected` was read.
    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: &Revision,
        value: Value,
    ) -> StoreResult<bool>;

    async fn watch(&self, path: &StorePath) -> StoreResult<Subscription>;

    fn transaction_retries(&self) -> u32 {
        DEFAULT_TRANSACTION_RETRIES
    }

    /// Optimistic read-modify-write. `update` returning `None` aborts without writing.
    async fn transaction(
        &self,
        path: &StorePath,
        update: &(dyn for<'v> Fn(Option<&'v Value>) -> Option<Value> + Send + Sync),
    ) -> StoreResult<TransactionOutcome> {
        let attempts = self.transaction_retries().max(1);
        for attempt in 1..=attempts {
            let (current, revision) = self.read_versioned(path).await?;
            let next = match update(current.as_ref()) {
                Some(next) => next,
                None => {
                    return Ok(TransactionOutcome {
                        committed: false,
                        snapshot: current,
                    })
                }
            };

            if self.compare_and_set(path, &revision, next.clone()).await? {
                let snapshot = if next.is_null() { None } else { Some(next) };
                return Ok(TransactionOutcome {
                    committed: true,
                    snapshot,
                });
            }
            tracing::debug!("Transaction on {} lost race (attempt {}/{})", path, attempt, attempts);
            tokio::time::sleep(contention_backoff(attempt)).await;
        }

        Err(StoreError::TransactionContention {
            path: path.to_string(),
            attempts,
        })
    }
}

/// Randomized pause before retrying a lost race, so contenders spread out
/// instead of colliding again on the next round.
fn contention_backoff(attempt: u32) -> Duration {
    let ceiling_ms = 1u64 << attempt.min(6);
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
}

/// Drop nulls and empty objects so absent and empty read back the same way.
pub fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prune_drops_empty_branches() {
        let value = json!({"a": {"b": null, "c": {}}, "d": [1, null], "e": 0});
        assert_eq!(prune(value), Some(json!({"d": [1, null], "e": 0})));
        assert_eq!(prune(json!({})), None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Unavailable("offline".into()).is_retryable());
        assert!(StoreError::Timeout(std::time::Duration::from_secs(15)).is_retryable());
        assert!(!StoreError::PermissionDenied("rules".into()).is_retryable());
        assert!(!StoreError::InvalidPath("x".into()).is_retryable());
    }
}
