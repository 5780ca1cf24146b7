use tokio::sync::broadcast;
use tourops_core::{NotificationSink, TracingSink};
use tourops_shared::SyncNotice;
use tracing::debug;

/// In-process fan-out of sync notices to UI streams and operator tooling.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncNotice>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notice: SyncNotice) {
        match self.sender.send(notice) {
            Ok(receivers) => debug!("Notice delivered to {} subscribers", receivers),
            Err(_) => debug!("Notice dropped, no subscribers"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for EventBus {
    fn notify(&self, notice: SyncNotice) {
        TracingSink.notify(notice.clone());
        self.publish(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notices_reach_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.notify(SyncNotice::ActionQueued {
            action_id: "mu_1".into(),
            tour_id: "T1".into(),
            reason: "offline".into(),
        });

        match rx.recv().await.unwrap() {
            SyncNotice::ActionQueued { action_id, .. } => assert_eq!(action_id, "mu_1"),
            other => panic!("unexpected notice {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        EventBus::new(4).publish(SyncNotice::ActionFailed {
            action_id: "mu_1".into(),
            attempts: 1,
            error: "offline".into(),
        });
    }
}
