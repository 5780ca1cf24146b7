use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tourops_core::{now_millis, paths, RealtimeStore};
use tracing::{info, warn};

use crate::{bounded, ManifestError};

const PARTICIPANTS: &str = "participants";
const CURRENT_PARTICIPANTS: &str = "currentParticipants";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub current_participants: u64,
    pub already_joined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub current_participants: u64,
    pub corrected: bool,
}

/// Keeps `currentParticipants` equal to the size of the participants map.
pub struct ParticipantCounter {
    store: Arc<dyn RealtimeStore>,
    timeout: Duration,
}

impl ParticipantCounter {
    pub fn new(store: Arc<dyn RealtimeStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn join_tour(&self, tour_id: &str, user_id: &str) -> Result<JoinOutcome, ManifestError> {
        paths::validate_segment(user_id)
            .map_err(|e| ManifestError::Validation(format!("user id: {}", e)))?;
        let path = paths::tour(tour_id)?;
        let joined_at = now_millis();
        let already_joined = AtomicBool::new(false);

        let join = |current: Option<&Value>| -> Option<Value> {
            let mut tour = current?.as_object()?.clone();
            let mut participants = participants_of(&tour);
            let member = participants.contains_key(user_id);
            already_joined.store(member, Ordering::SeqCst);

            if member {
                if recorded_count(&tour) == Some(participants.len() as u64) {
                    return None;
                }
            } else {
                participants.insert(user_id.to_string(), json!(joined_at));
            }

            let count = participants.len() as u64;
            tour.insert(PARTICIPANTS.into(), Value::Object(participants));
            tour.insert(CURRENT_PARTICIPANTS.into(), json!(count));
            Some(Value::Object(tour))
        };

        let outcome = bounded(self.timeout, self.store.transaction(&path, &join)).await?;
        let tour = outcome
            .snapshot
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| ManifestError::TourNotFound(tour_id.to_string()))?;

        let current_participants = participants_of(tour).len() as u64;
        let already_joined = already_joined.load(Ordering::SeqCst);
        if already_joined {
            info!("User {} already on tour {} ({} participants)", user_id, tour_id, current_participants);
        } else {
            info!("User {} joined tour {} ({} participants)", user_id, tour_id, current_participants);
        }

        Ok(JoinOutcome {
            current_participants,
            already_joined,
        })
    }

    /// Rewrites a drifted `currentParticipants` from the participants map.
    pub async fn ensure_participant_count(&self, tour_id: &str) -> Result<ReconcileOutcome, ManifestError> {
        let path = paths::tour(tour_id)?;

        let reconcile = |current: Option<&Value>| -> Option<Value> {
            let mut tour = current?.as_object()?.clone();
            let actual = participants_of(&tour).len() as u64;
            if recorded_count(&tour) == Some(actual) {
                return None;
            }
            tour.insert(CURRENT_PARTICIPANTS.into(), json!(actual));
            Some(Value::Object(tour))
        };

        let outcome = bounded(self.timeout, self.store.transaction(&path, &reconcile)).await?;
        let tour = outcome
            .snapshot
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| ManifestError::TourNotFound(tour_id.to_string()))?;

        let current_participants = participants_of(tour).len() as u64;
        if outcome.committed {
            warn!("Participant count on tour {} drifted, reset to {}", tour_id, current_participants);
        }

        Ok(ReconcileOutcome {
            current_participants,
            corrected: outcome.committed,
        })
    }
}

fn participants_of(tour: &Map<String, Value>) -> Map<String, Value> {
    tour.get(PARTICIPANTS)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn recorded_count(tour: &Map<String, Value>) -> Option<u64> {
    tour.get(CURRENT_PARTICIPANTS).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourops_core::MemoryStore;

    async fn tour_store(tour: Value) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.write(&paths::tour("T1").unwrap(), tour).await.unwrap();
        store
    }

    fn counter(store: &Arc<MemoryStore>) -> ParticipantCounter {
        ParticipantCounter::new(store.clone(), Duration::from_secs(15))
    }

    #[tokio::test]
    async fn test_join_increments_once() {
        let store = tour_store(json!({"name": "Golden Circle", "currentParticipants": 0})).await;
        let counter = counter(&store);

        let first = counter.join_tour("T1", "u1").await.unwrap();
        assert_eq!(first, JoinOutcome { current_participants: 1, already_joined: false });

        let writes = store.write_count();
        let again = counter.join_tour("T1", "u1").await.unwrap();
        assert_eq!(again, JoinOutcome { current_participants: 1, already_joined: true });
        assert_eq!(store.write_count(), writes);

        let tour = store.read(&paths::tour("T1").unwrap()).await.unwrap().unwrap();
        assert_eq!(tour["name"], "Golden Circle");
        assert_eq!(tour["currentParticipants"], 1);
    }

    #[tokio::test]
    async fn test_rejoin_heals_drifted_count() {
        let store = tour_store(json!({"participants": {"u1": 1, "u2": 2}, "currentParticipants": 7})).await;
        let outcome = counter(&store).join_tour("T1", "u2").await.unwrap();

        assert!(outcome.already_joined);
        assert_eq!(outcome.current_participants, 2);
        let count = store.read(&paths::tour("T1").unwrap().child(CURRENT_PARTICIPANTS).unwrap()).await.unwrap();
        assert_eq!(count, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_missing_tour_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = counter(&store).join_tour("GHOST", "u1").await.unwrap_err();
        assert!(matches!(err, ManifestError::TourNotFound(id) if id == "GHOST"));
    }

    #[tokio::test]
    async fn test_ensure_participant_count() {
        let store = tour_store(json!({"participants": {"u1": 1, "u2": 2, "u3": 3}, "currentParticipants": 1})).await;
        let counter = counter(&store);

        let fixed = counter.ensure_participant_count("T1").await.unwrap();
        assert_eq!(fixed, ReconcileOutcome { current_participants: 3, corrected: true });

        let steady = counter.ensure_participant_count("T1").await.unwrap();
        assert_eq!(steady, ReconcileOutcome { current_participants: 3, corrected: false });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_converge() {
        let store = tour_store(json!({"name": "Ring Road", "currentParticipants": 0})).await;
        let counter = Arc::new(counter(&store));

        let joins: Vec<_> = (0..12)
            .map(|i| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.join_tour("T1", &format!("user-{}", i)).await })
            })
            .collect();
        for join in joins {
            assert!(!join.await.unwrap().unwrap().already_joined);
        }

        let tour = store.read(&paths::tour("T1").unwrap()).await.unwrap().unwrap();
        assert_eq!(tour["currentParticipants"], 12);
        assert_eq!(tour["participants"].as_object().unwrap().len(), 12);
    }
}
