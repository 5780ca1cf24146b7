use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tourops_core::{NotificationSink, SessionSignal};
use tourops_manifest::{ManifestMutator, ManifestUpdatePayload, MutationOutcome};
use tourops_shared::{ReplaySummary, SyncNotice};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::action::{ActionStatus, ActionUpdate, QueuedAction, MANIFEST_UPDATE};
use crate::backoff::RetryPolicy;
use crate::queue::OfflineActionQueue;
use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Applied,
    AlreadyApplied,
    /// Newer data was already stored; the action was resolved without writing.
    Reconciled,
}

/// Replays one kind of queued action, selected by its type tag.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> &'static str;

    async fn handle(&self, action: &QueuedAction) -> SyncResult<HandlerOutcome>;
}

/// Replays `MANIFEST_UPDATE` actions through the manifest mutator.
pub struct ManifestUpdateHandler {
    mutator: Arc<ManifestMutator>,
}

impl ManifestUpdateHandler {
    pub fn new(mutator: Arc<ManifestMutator>) -> Self {
        Self { mutator }
    }
}

#[async_trait]
impl ActionHandler for ManifestUpdateHandler {
    fn action_type(&self) -> &'static str {
        MANIFEST_UPDATE
    }

    async fn handle(&self, action: &QueuedAction) -> SyncResult<HandlerOutcome> {
        let payload: ManifestUpdatePayload = serde_json::from_value(action.payload.clone())?;
        let outcome = match self.mutator.apply_direct(&payload).await? {
            MutationOutcome::Applied { .. } => HandlerOutcome::Applied,
            MutationOutcome::AlreadyApplied { .. } => HandlerOutcome::AlreadyApplied,
            MutationOutcome::Reconciled { .. } => HandlerOutcome::Reconciled,
        };
        Ok(outcome)
    }
}

/// Sweeps the offline queue, dispatching each eligible action once per call.
pub struct ReplayCoordinator {
    queue: Arc<OfflineActionQueue>,
    handlers: HashMap<&'static str, Arc<dyn ActionHandler>>,
    session: Arc<dyn SessionSignal>,
    notices: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
    synced_retention: Duration,
}

impl ReplayCoordinator {
    pub fn new(
        queue: Arc<OfflineActionQueue>,
        session: Arc<dyn SessionSignal>,
        notices: Arc<dyn NotificationSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            session,
            notices,
            policy,
            synced_retention: Duration::ZERO,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(handler.action_type(), handler);
        self
    }

    /// How long synced entries stay visible before a sweep prunes them.
    pub fn with_synced_retention(mut self, retention: Duration) -> Self {
        self.synced_retention = retention;
        self
    }

    /// Best-effort sweep. Individual failures, including queue persistence failures,
    /// are recorded on the entry and in the summary; the sweep always visits every
    /// eligible action.
    pub async fn replay(&self) -> SyncResult<ReplaySummary> {
        let sweep_id = Uuid::new_v4();
        self.sweep(sweep_id)
            .instrument(info_span!("replay_sweep", %sweep_id))
            .await
    }

    async fn sweep(&self, sweep_id: Uuid) -> SyncResult<ReplaySummary> {
        let mut summary = ReplaySummary {
            sweep_id,
            ..Default::default()
        };

        if !self.session.is_online() {
            debug!("Offline, skipping replay");
            summary.offline = true;
            return Ok(summary);
        }

        let now = Utc::now();
        for action in self.queue.list().await {
            if !action.status.is_replayable() {
                if action.status == ActionStatus::Syncing {
                    summary.skipped_busy += 1;
                }
                continue;
            }
            if action.is_backing_off(now) {
                summary.skipped_backoff += 1;
                continue;
            }
            // Another sweep may have claimed it since `list`.
            let action = match self.queue.claim(&action.id).await {
                Ok(Some(action)) => action,
                Ok(None) => {
                    summary.skipped_busy += 1;
                    continue;
                }
                Err(err) => {
                    // Nothing changed in memory; the entry stays eligible.
                    error!("Could not claim {}: {}", action.id, err);
                    summary.persistence_errors += 1;
                    continue;
                }
            };

            summary.attempted += 1;
            let (update, outcome) = match self.dispatch(&action).await {
                Ok(outcome) => (ActionUpdate::synced(), Ok(outcome)),
                Err(err) => {
                    let message = err.to_string();
                    (self.failure(&action, message.clone()), Err(message))
                }
            };

            if let Err(err) = self.queue.update_status(&action.id, update).await {
                error!("Could not record replay result for {}: {}", action.id, err);
                summary.persistence_errors += 1;
                summary.still_failed += 1;
                let message = format!("replay result not saved: {}", err);
                self.queue
                    .release(&action.id, self.failure(&action, message.clone()))
                    .await;
                self.notify_failed(&action, message);
                continue;
            }

            match outcome {
                Ok(outcome) => {
                    summary.synced += 1;
                    if outcome == HandlerOutcome::Reconciled {
                        summary.conflicts += 1;
                    }
                    debug!("Action {} synced ({:?})", action.id, outcome);
                }
                Err(message) => {
                    summary.still_failed += 1;
                    warn!("Action {} failed on attempt {}: {}", action.id, action.attempts + 1, message);
                    self.notify_failed(&action, message);
                }
            }
        }

        if let Err(err) = self.queue.prune_synced(self.synced_retention).await {
            warn!("Could not prune synced actions: {}", err);
            summary.persistence_errors += 1;
        }

        if summary.attempted > 0 || summary.persistence_errors > 0 {
            info!(
                "Replay sweep done: {} attempted, {} synced, {} failed, {} conflicts, {} persistence errors",
                summary.attempted, summary.synced, summary.still_failed, summary.conflicts, summary.persistence_errors
            );
            self.notices.notify(SyncNotice::ReplayCompleted(summary.clone()));
        }
        Ok(summary)
    }

    /// Failed attempt with the next back-off window.
    fn failure(&self, action: &QueuedAction, message: String) -> ActionUpdate {
        let attempts = action.attempts.saturating_add(1);
        let delay = self.policy.delay_for_attempt(attempts);
        let retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        debug!("Action {} next eligible in {:?}", action.id, delay);
        ActionUpdate::failed(attempts, message, retry_at)
    }

    fn notify_failed(&self, action: &QueuedAction, error: String) {
        self.notices.notify(SyncNotice::ActionFailed {
            action_id: action.id.clone(),
            attempts: action.attempts.saturating_add(1),
            error,
        });
    }

    async fn dispatch(&self, action: &QueuedAction) -> SyncResult<HandlerOutcome> {
        let handler = self
            .handlers
            .get(action.action_type.as_str())
            .ok_or_else(|| SyncError::UnknownActionType(action.action_type.clone()))?;
        handler.handle(action).await
    }
}
