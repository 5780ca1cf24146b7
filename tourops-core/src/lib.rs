pub mod memory;
pub mod notify;
pub mod paths;
pub mod session;
pub mod store;
pub mod tree;

pub use memory::MemoryStore;
pub use notify::{NotificationSink, TracingSink};
pub use paths::StorePath;
pub use session::{ConnectivityMonitor, SessionSignal};
pub use store::{RealtimeStore, Revision, StoreError, StoreResult, Subscription, TransactionOutcome};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Wall-clock time in epoch milliseconds, the unit every stored timestamp uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
