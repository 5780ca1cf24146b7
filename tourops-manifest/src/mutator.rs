use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tourops_core::{paths, NotificationSink, RealtimeStore};
use tourops_shared::{BookingState, ConflictNotice, ManifestEntry, PassengerState, SyncNotice};
use tracing::{debug, info, warn};

use crate::entry::StoredEntry;
use crate::status::derive;
use crate::ManifestError;

/// Ceiling for a direct manifest write; past it the write is abandoned and counted as failed.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Lost compare-and-set races tolerated within one direct write.
const MAX_WRITE_RACES: u32 = 3;

/// One manifest mutation, exactly as queued and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestUpdatePayload {
    pub tour_id: String,
    pub booking_ref: String,
    pub passenger_states: Vec<PassengerState>,
    /// Taken when the driver made the change, never at replay time.
    pub last_updated: i64,
    pub idempotency_key: String,
    /// Operator who made the change, captured with the mutation so a later replay
    /// is attributed to them rather than to whoever is signed in at the time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Applied {
        status: BookingState,
        entry: ManifestEntry,
    },
    /// The stored entry already carries this mutation's idempotency key.
    AlreadyApplied { status: BookingState },
    /// The store held newer data; nothing was written.
    Reconciled {
        status: BookingState,
        passenger_states: Vec<PassengerState>,
        stored_last_updated: i64,
        message: String,
    },
}

impl MutationOutcome {
    pub fn status(&self) -> BookingState {
        match self {
            MutationOutcome::Applied { status, .. }
            | MutationOutcome::AlreadyApplied { status }
            | MutationOutcome::Reconciled { status, .. } => *status,
        }
    }

    pub fn conflict_message(&self) -> Option<&str> {
        match self {
            MutationOutcome::Reconciled { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MutationOutcome::Reconciled { .. })
    }
}

/// Applies manifest updates directly against the store with last-writer-wins by client timestamp.
pub struct ManifestMutator {
    store: Arc<dyn RealtimeStore>,
    notices: Arc<dyn NotificationSink>,
    write_timeout: Duration,
}

impl ManifestMutator {
    pub fn new(store: Arc<dyn RealtimeStore>, notices: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notices,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn validate(payload: &ManifestUpdatePayload) -> Result<(), ManifestError> {
        paths::validate_segment(&payload.tour_id)
            .map_err(|e| ManifestError::Validation(format!("tour code: {}", e)))?;
        paths::validate_segment(&payload.booking_ref)
            .map_err(|e| ManifestError::Validation(format!("booking reference: {}", e)))?;
        if payload.idempotency_key.trim().is_empty() {
            return Err(ManifestError::Validation("idempotency key cannot be empty".into()));
        }
        Ok(())
    }

    pub async fn apply_direct(&self, payload: &ManifestUpdatePayload) -> Result<MutationOutcome, ManifestError> {
        Self::validate(payload)?;

        let outcome = match tokio::time::timeout(self.write_timeout, self.apply_unbounded(payload)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Manifest write for {}/{} abandoned after {:?}",
                    payload.tour_id, payload.booking_ref, self.write_timeout
                );
                return Err(ManifestError::Timeout(self.write_timeout));
            }
        };

        if let MutationOutcome::Reconciled {
            status,
            stored_last_updated,
            message,
            ..
        } = &outcome
        {
            self.notices.notify(SyncNotice::Conflict(ConflictNotice {
                tour_id: payload.tour_id.clone(),
                booking_ref: payload.booking_ref.clone(),
                stored_last_updated: *stored_last_updated,
                attempted_last_updated: payload.last_updated,
                kept_status: *status,
                message: message.clone(),
            }));
        }

        Ok(outcome)
    }

    async fn apply_unbounded(&self, payload: &ManifestUpdatePayload) -> Result<MutationOutcome, ManifestError> {
        let path = paths::manifest_entry(&payload.tour_id, &payload.booking_ref)?;

        for race in 1..=MAX_WRITE_RACES {
            let (current, revision) = self.store.read_versioned(&path).await?;
            let stored = current.as_ref().map(StoredEntry::parse);

            if let Some(stored) = &stored {
                if stored.idempotency_key.as_deref() == Some(payload.idempotency_key.as_str()) {
                    debug!("Mutation {} already applied to {}", payload.idempotency_key, path);
                    return Ok(MutationOutcome::AlreadyApplied { status: stored.status });
                }

                if let Some(stored_at) = stored.last_updated.filter(|at| *at > payload.last_updated) {
                    let passenger_count = stored
                        .passenger_states
                        .as_ref()
                        .map_or(payload.passenger_states.len(), Vec::len);
                    let (passenger_states, status) = stored.resolve(passenger_count);
                    info!(
                        "Stale manifest write for {} ({} < {}), keeping server data",
                        path, payload.last_updated, stored_at
                    );
                    return Ok(MutationOutcome::Reconciled {
                        status,
                        passenger_states,
                        stored_last_updated: stored_at,
                        message: format!(
                            "Booking {} was updated on another device more recently; kept the newer {} status.",
                            payload.booking_ref, status
                        ),
                    });
                }
            }

            let status = derive(&payload.passenger_states);
            let entry = ManifestEntry {
                passenger_status: payload.passenger_states.clone(),
                status,
                last_updated: payload.last_updated,
                idempotency_key: Some(payload.idempotency_key.clone()),
                updated_by: payload.updated_by.clone(),
            };
            let value = serde_json::to_value(&entry).map_err(tourops_core::StoreError::from)?;

            if self.store.compare_and_set(&path, &revision, value).await? {
                info!("Manifest {} set to {} ({})", path, status, payload.idempotency_key);
                return Ok(MutationOutcome::Applied { status, entry });
            }
            debug!("Manifest write on {} lost race {}/{}", path, race, MAX_WRITE_RACES);
        }

        Err(ManifestError::Store(tourops_core::StoreError::TransactionContention {
            path: path.to_string(),
            attempts: MAX_WRITE_RACES,
        }))
    }
}
