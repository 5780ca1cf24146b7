use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tourops_sync::SyncEngine;
use tracing::{error, info};

/// Background replay: sweeps the queue when connectivity returns and on every
/// tick while online. Stops when the connectivity sender is dropped.
pub fn start_replay_worker(
    engine: Arc<SyncEngine>,
    mut online: watch::Receiver<bool>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Replay worker started (interval {:?})", every);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                    info!("Back online, replaying queued actions");
                }
                _ = ticker.tick() => {
                    if !*online.borrow() || engine.queue_counts().total == 0 {
                        continue;
                    }
                }
            }

            match engine.replay_queue().await {
                Ok(summary) if summary.attempted > 0 => {
                    info!(
                        "Replay {}: {} synced, {} still failed",
                        summary.sweep_id, summary.synced, summary.still_failed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Replay sweep failed: {}", e),
            }
        }
        info!("Replay worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourops_core::{ConnectivityMonitor, MemoryStore, TracingSink};
    use tourops_sync::{MemoryQueueStorage, SyncSettings, UpdateOptions};

    #[tokio::test]
    async fn test_reconnect_triggers_replay() {
        let store = Arc::new(MemoryStore::new());
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let engine = Arc::new(
            SyncEngine::new(
                store,
                monitor.clone(),
                Arc::new(MemoryQueueStorage::new()),
                Arc::new(TracingSink),
                SyncSettings::default(),
            )
            .await
            .unwrap(),
        );

        let outcome = engine
            .update_manifest_booking("T1", "B1", &["BOARDED"], UpdateOptions::default())
            .await
            .unwrap();
        assert!(outcome.queued);

        let worker = start_replay_worker(engine.clone(), monitor.subscribe(), Duration::from_secs(3600));
        monitor.set_online(true);

        for _ in 0..100 {
            if engine.queue_counts().total == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.queue_counts().total, 0);
        worker.abort();
    }
}
