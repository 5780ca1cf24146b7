use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::manifest::BookingState;

/// Aggregate queue counts pushed to queue-state subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    /// Entries not yet confirmed, i.e. `pending + syncing + failed`.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNotice {
    pub tour_id: String,
    pub booking_ref: String,
    pub stored_last_updated: i64,
    pub attempted_last_updated: i64,
    pub kept_status: BookingState,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub sweep_id: Uuid,
    pub attempted: usize,
    pub synced: usize,
    pub still_failed: usize,
    pub conflicts: usize,
    pub skipped_backoff: usize,
    pub skipped_busy: usize,
    /// Queue writes refused during the sweep; affected entries are retried later.
    #[serde(default)]
    pub persistence_errors: usize,
    pub offline: bool,
}

/// Fire-and-forget notices for operator-facing sinks (toasts, push, logs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncNotice {
    Conflict(ConflictNotice),
    ActionQueued {
        action_id: String,
        tour_id: String,
        reason: String,
    },
    ActionFailed {
        action_id: String,
        attempts: u32,
        error: String,
    },
    ReplayCompleted(ReplaySummary),
}
