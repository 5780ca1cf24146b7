use tourops_shared::SyncNotice;
use tracing::{info, warn};

/// Fire-and-forget sink for operator-facing notices (toasts, push, audit log).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: SyncNotice);
}

/// Sink that only writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notice: SyncNotice) {
        match notice {
            SyncNotice::Conflict(conflict) => warn!(
                "Manifest conflict on {}/{}: {}",
                conflict.tour_id, conflict.booking_ref, conflict.message
            ),
            SyncNotice::ActionQueued { action_id, reason, .. } => {
                info!("Action {} queued: {}", action_id, reason)
            }
            SyncNotice::ActionFailed { action_id, attempts, error } => {
                warn!("Action {} failed (attempt {}): {}", action_id, attempts, error)
            }
            SyncNotice::ReplayCompleted(summary) => info!(
                "Replay {} finished: {} synced, {} still failed",
                summary.sweep_id, summary.synced, summary.still_failed
            ),
        }
    }
}
