use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tourops_core::{now_millis, NotificationSink, RealtimeStore, SessionSignal};
use tourops_manifest::{
    derive, JoinOutcome, ManifestMutator, ManifestReader, ManifestUpdatePayload, ParticipantCounter,
    ReconcileOutcome, TourManifest,
};
use tourops_shared::{BookingState, PassengerState, QueueCounts, ReplaySummary, SyncNotice};
use tracing::{error, info, warn};

use crate::action::{QueuedAction, MANIFEST_UPDATE};
use crate::backoff::RetryPolicy;
use crate::breaker::CircuitBreaker;
use crate::queue::{OfflineActionQueue, QueueStorage, QueueSubscription};
use crate::replay::{ManifestUpdateHandler, ReplayCoordinator};
use crate::{SyncError, SyncResult};

/// Tunables for one engine instance, filled from the application config.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
    pub synced_retention: Duration,
    pub breaker_failure_threshold: usize,
    pub breaker_reset: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            write_timeout: tourops_manifest::DEFAULT_WRITE_TIMEOUT,
            retry: RetryPolicy::default(),
            synced_retention: Duration::from_secs(300),
            breaker_failure_threshold: 3,
            breaker_reset: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// When the operator made the change, epoch ms. Defaults to now.
    pub last_updated: Option<i64>,
    pub idempotency_key: Option<String>,
    /// Operator making the change. Defaults to the session's current user.
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestUpdateOutcome {
    pub success: bool,
    pub queued: bool,
    pub status: BookingState,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_message: Option<String>,
}

/// Default key for a manifest mutation: stable for the same change made at the same instant.
pub fn idempotency_key(tour_id: &str, booking_ref: &str, states: &[PassengerState], last_updated: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tour_id.as_bytes());
    hasher.update(b"/");
    hasher.update(booking_ref.as_bytes());
    for state in states {
        hasher.update(b"|");
        hasher.update(state.as_str().as_bytes());
    }
    hasher.update(b"@");
    hasher.update(last_updated.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("mu_{}", &digest[..32])
}

/// Offline-first manifest sync engine. Construct once at startup and share.
pub struct SyncEngine {
    session: Arc<dyn SessionSignal>,
    notices: Arc<dyn NotificationSink>,
    queue: Arc<OfflineActionQueue>,
    mutator: Arc<ManifestMutator>,
    reader: ManifestReader,
    counter: ParticipantCounter,
    coordinator: ReplayCoordinator,
    breaker: CircuitBreaker,
}

impl SyncEngine {
    pub async fn new(
        store: Arc<dyn RealtimeStore>,
        session: Arc<dyn SessionSignal>,
        queue_storage: Arc<dyn QueueStorage>,
        notices: Arc<dyn NotificationSink>,
        settings: SyncSettings,
    ) -> SyncResult<Self> {
        let queue = Arc::new(OfflineActionQueue::open(queue_storage).await?);
        let mutator = Arc::new(
            ManifestMutator::new(store.clone(), notices.clone())
                .with_write_timeout(settings.write_timeout),
        );
        let coordinator = ReplayCoordinator::new(queue.clone(), session.clone(), notices.clone(), settings.retry)
            .with_handler(Arc::new(ManifestUpdateHandler::new(mutator.clone())))
            .with_synced_retention(settings.synced_retention);

        Ok(Self {
            reader: ManifestReader::new(store.clone(), settings.write_timeout),
            counter: ParticipantCounter::new(store, settings.write_timeout),
            breaker: CircuitBreaker::new(
                "manifest_writes",
                settings.breaker_failure_threshold,
                settings.breaker_reset,
            ),
            session,
            notices,
            queue,
            mutator,
            coordinator,
        })
    }

    /// Record boarding states for one booking, writing through when possible and
    /// queueing when the network can't take it.
    pub async fn update_manifest_booking<S: AsRef<str>>(
        &self,
        tour_code: &str,
        booking_ref: &str,
        passenger_states: &[S],
        options: UpdateOptions,
    ) -> SyncResult<ManifestUpdateOutcome> {
        let states = PassengerState::parse_all(passenger_states).map_err(|e| SyncError::Validation(e.to_string()))?;
        let last_updated = options.last_updated.unwrap_or_else(now_millis);
        let key = options
            .idempotency_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| idempotency_key(tour_code, booking_ref, &states, last_updated));

        let payload = ManifestUpdatePayload {
            tour_id: tour_code.to_string(),
            booking_ref: booking_ref.to_string(),
            passenger_states: states,
            last_updated,
            idempotency_key: key,
            updated_by: options.author.or_else(|| self.session.current_user()),
        };
        ManifestMutator::validate(&payload)?;

        if !self.session.is_online() {
            return self.enqueue(payload, "offline", None).await;
        }
        if !self.breaker.check().await {
            return self.enqueue(payload, "store circuit open", None).await;
        }

        match self.mutator.apply_direct(&payload).await {
            Ok(outcome) => {
                self.breaker.record_success().await;
                Ok(ManifestUpdateOutcome {
                    success: true,
                    queued: false,
                    status: outcome.status(),
                    idempotency_key: payload.idempotency_key,
                    conflict_message: outcome.conflict_message().map(str::to_string),
                })
            }
            Err(err) if err.is_retryable() => {
                self.breaker.record_failure().await;
                warn!(
                    "Direct write for {}/{} failed, queueing: {}",
                    payload.tour_id, payload.booking_ref, err
                );
                let reason = err.to_string();
                self.enqueue(payload, "write failed", Some(reason)).await
            }
            Err(err) => {
                // The store answered, so it is reachable.
                self.breaker.record_success().await;
                Err(err.into())
            }
        }
    }

    async fn enqueue(
        &self,
        payload: ManifestUpdatePayload,
        reason: &str,
        last_error: Option<String>,
    ) -> SyncResult<ManifestUpdateOutcome> {
        let status = derive(&payload.passenger_states);
        let mut action = QueuedAction::new(
            payload.idempotency_key.clone(),
            MANIFEST_UPDATE,
            payload.tour_id.clone(),
            serde_json::to_value(&payload)?,
        );
        action.last_error = last_error;

        let action = self.queue.enqueue(action).await.map_err(|e| {
            error!("Could not queue manifest update {}: {}", payload.idempotency_key, e);
            SyncError::Queue(e)
        })?;
        info!("Queued manifest update {} ({})", action.id, reason);
        self.notices.notify(SyncNotice::ActionQueued {
            action_id: action.id.clone(),
            tour_id: action.tour_id.clone(),
            reason: reason.to_string(),
        });

        Ok(ManifestUpdateOutcome {
            success: true,
            queued: true,
            status,
            idempotency_key: action.id,
            conflict_message: None,
        })
    }

    pub async fn get_tour_manifest(&self, tour_code: &str) -> SyncResult<TourManifest> {
        Ok(self.reader.get_tour_manifest(tour_code).await?)
    }

    pub async fn replay_queue(&self) -> SyncResult<ReplaySummary> {
        self.coordinator.replay().await
    }

    /// Clear back-off on failed entries, then sweep.
    pub async fn retry_failed_now(&self) -> SyncResult<ReplaySummary> {
        self.queue.retry_failed_now().await?;
        self.coordinator.replay().await
    }

    pub fn subscribe_queue_state<F>(&self, callback: F) -> QueueSubscription
    where
        F: Fn(QueueCounts) + Send + Sync + 'static,
    {
        self.queue.subscribe(callback)
    }

    pub fn queue_state(&self) -> watch::Receiver<QueueCounts> {
        self.queue.watch_counts()
    }

    pub fn queue_counts(&self) -> QueueCounts {
        self.queue.counts()
    }

    pub async fn queued_actions(&self) -> Vec<QueuedAction> {
        self.queue.list().await
    }

    pub async fn join_tour(&self, tour_id: &str, user_id: &str) -> SyncResult<JoinOutcome> {
        Ok(self.counter.join_tour(tour_id, user_id).await?)
    }

    pub async fn ensure_participant_count(&self, tour_id: &str) -> SyncResult<ReconcileOutcome> {
        Ok(self.counter.ensure_participant_count(tour_id).await?)
    }

    pub fn is_online(&self) -> bool {
        self.session.is_online()
    }
}
