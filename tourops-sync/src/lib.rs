pub mod action;
pub mod backoff;
pub mod breaker;
pub mod engine;
pub mod queue;
pub mod replay;

pub use action::{ActionStatus, ActionUpdate, QueuedAction, MANIFEST_UPDATE};
pub use backoff::RetryPolicy;
pub use breaker::{CircuitBreaker, CircuitState};
pub use engine::{idempotency_key, ManifestUpdateOutcome, SyncEngine, SyncSettings, UpdateOptions};
pub use queue::{MemoryQueueStorage, OfflineActionQueue, QueueStorage, QueueSubscription};
pub use replay::{ActionHandler, HandlerOutcome, ManifestUpdateHandler, ReplayCoordinator};

use tourops_manifest::ManifestError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue persistence failed: {0}")]
    Persistence(String),

    #[error("Queued action not found: {0}")]
    NotFound(String),

    #[error("Queued action could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Nothing was recorded; the mutation must be reported as failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("No handler registered for action type {0}")]
    UnknownActionType(String),

    #[error("Malformed action payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_) | SyncError::Manifest(ManifestError::Validation(_))
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
