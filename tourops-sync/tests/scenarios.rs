use std::sync::Arc;
use std::time::Duration;
use tourops_core::{paths, ConnectivityMonitor, MemoryStore, RealtimeStore, TracingSink};
use tourops_shared::BookingState;
use tourops_sync::{ActionStatus, MemoryQueueStorage, SyncEngine, SyncSettings, UpdateOptions};

struct Device {
    store: Arc<MemoryStore>,
    session: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine>,
}

async fn device() -> Device {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(ConnectivityMonitor::default());
    let engine = SyncEngine::new(
        store.clone(),
        session.clone(),
        Arc::new(MemoryQueueStorage::new()),
        Arc::new(TracingSink),
        SyncSettings::default(),
    )
    .await
    .unwrap();
    Device {
        store,
        session,
        engine: Arc::new(engine),
    }
}

fn at(last_updated: i64) -> UpdateOptions {
    UpdateOptions {
        last_updated: Some(last_updated),
        ..Default::default()
    }
}

async fn stored_status(store: &MemoryStore, booking_ref: &str) -> Option<serde_json::Value> {
    store
        .read(&paths::manifest_entry("T1", booking_ref).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn offline_updates_replay_after_reconnect() {
    let d = device().await;
    d.session.set_online(false);

    d.engine
        .update_manifest_booking("T1", "B1", &["BOARDED", "BOARDED"], at(1_000))
        .await
        .unwrap();
    d.engine
        .update_manifest_booking("T1", "B2", &["BOARDED", "NO_SHOW"], at(1_100))
        .await
        .unwrap();
    assert_eq!(d.engine.queue_counts().pending, 2);

    let offline = d.engine.replay_queue().await.unwrap();
    assert!(offline.offline);

    d.session.set_online(true);
    let summary = d.engine.replay_queue().await.unwrap();
    assert_eq!((summary.attempted, summary.synced, summary.still_failed), (2, 2, 0));
    assert_eq!(d.engine.queue_counts().total, 0);

    let b2 = stored_status(&d.store, "B2").await.unwrap();
    assert_eq!(b2["status"], "PARTIAL");

    let again = d.engine.replay_queue().await.unwrap();
    assert_eq!(again.attempted, 0);
}

#[tokio::test]
async fn replay_converges_to_newest_edit_in_either_order() {
    for reversed in [false, true] {
        let d = device().await;
        d.session.set_online(false);

        let mut edits = vec![(1_000, "NO_SHOW"), (2_000, "BOARDED")];
        if reversed {
            edits.reverse();
        }
        for (ts, state) in edits {
            d.engine
                .update_manifest_booking("T1", "B1", &[state], at(ts))
                .await
                .unwrap();
        }

        d.session.set_online(true);
        let summary = d.engine.replay_queue().await.unwrap();
        assert_eq!(summary.synced, 2);
        assert_eq!(summary.conflicts, usize::from(reversed));

        let entry = stored_status(&d.store, "B1").await.unwrap();
        assert_eq!(entry["status"], "BOARDED", "reversed={}", reversed);
        assert_eq!(entry["lastUpdated"], 2_000);
    }
}

#[tokio::test]
async fn stale_direct_write_reports_stored_status() {
    let d = device().await;
    d.engine
        .update_manifest_booking("T1", "B1", &["BOARDED"], at(5_000))
        .await
        .unwrap();

    let stale = d
        .engine
        .update_manifest_booking("T1", "B1", &["NO_SHOW"], at(4_000))
        .await
        .unwrap();
    assert!(stale.success && !stale.queued);
    assert_eq!(stale.status, BookingState::Boarded);
    assert!(stale.conflict_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn timed_out_write_is_queued_and_retried_manually() {
    let d = device().await;
    d.store.set_write_latency(Duration::from_secs(20));

    let outcome = d
        .engine
        .update_manifest_booking("T1", "B1", &["BOARDED"], at(1_000))
        .await
        .unwrap();
    assert!(outcome.queued);

    let queued = d.engine.queued_actions().await;
    assert_eq!(queued[0].status, ActionStatus::Queued);
    assert!(queued[0].last_error.as_deref().unwrap_or_default().contains("timed out"));

    // Still slow: the replay attempt fails and backs off.
    let failed = d.engine.replay_queue().await.unwrap();
    assert_eq!(failed.still_failed, 1);

    d.store.set_write_latency(Duration::ZERO);
    let backed_off = d.engine.replay_queue().await.unwrap();
    assert_eq!(backed_off.skipped_backoff, 1);

    let retried = d.engine.retry_failed_now().await.unwrap();
    assert_eq!(retried.synced, 1);
    assert_eq!(stored_status(&d.store, "B1").await.unwrap()["status"], "BOARDED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_replays_apply_each_action_once() {
    let d = device().await;
    d.session.set_online(false);
    for i in 0..6 {
        d.engine
            .update_manifest_booking("T1", &format!("B{}", i), &["BOARDED"], at(1_000 + i))
            .await
            .unwrap();
    }
    d.session.set_online(true);
    d.store.set_write_latency(Duration::from_millis(10));

    let (a, b) = tokio::join!(
        {
            let engine = d.engine.clone();
            tokio::spawn(async move { engine.replay_queue().await })
        },
        {
            let engine = d.engine.clone();
            tokio::spawn(async move { engine.replay_queue().await })
        }
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert_eq!(a.synced + b.synced, 6);
    assert_eq!(d.store.write_count(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_count_every_participant() {
    let d = device().await;
    d.store
        .write(&paths::tour("T1").unwrap(), serde_json::json!({"currentParticipants": 0}))
        .await
        .unwrap();
    d.store.set_write_latency(Duration::from_millis(1));

    // Well past the 25-attempt transaction budget.
    let joins: Vec<_> = (0..60)
        .map(|i| {
            let engine = d.engine.clone();
            tokio::spawn(async move { engine.join_tour("T1", &format!("guest-{}", i)).await })
        })
        .collect();
    for join in joins {
        let outcome = join.await.unwrap().unwrap();
        assert!(!outcome.already_joined);
    }

    let tour = d.store.read(&paths::tour("T1").unwrap()).await.unwrap().unwrap();
    assert_eq!(tour["currentParticipants"], 60);
    assert_eq!(tour["participants"].as_object().unwrap().len(), 60);

    let healed = d.engine.ensure_participant_count("T1").await.unwrap();
    assert_eq!(healed.current_participants, 60);
    assert!(!healed.corrected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_to_different_bookings_all_write_through() {
    let d = device().await;
    d.store.set_write_latency(Duration::from_millis(5));

    let updates: Vec<_> = (0..20)
        .map(|i| {
            let engine = d.engine.clone();
            tokio::spawn(async move {
                engine
                    .update_manifest_booking("T1", &format!("B{}", i), &["BOARDED"], at(1_000))
                    .await
            })
        })
        .collect();
    for update in updates {
        let outcome = update.await.unwrap().unwrap();
        assert!(!outcome.queued, "unrelated bookings must not contend");
    }

    assert_eq!(d.engine.queue_counts().total, 0);
    assert_eq!(d.store.write_count(), 20);
    for i in 0..20 {
        let entry = stored_status(&d.store, &format!("B{}", i)).await.unwrap();
        assert_eq!(entry["status"], "BOARDED");
    }
}
