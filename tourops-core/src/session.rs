use tokio::sync::watch;
use tracing::info;

/// Opaque view of the authentication/connectivity layer.
pub trait SessionSignal: Send + Sync {
    /// Id of the signed-in operator, if any.
    fn current_user(&self) -> Option<String>;

    fn is_online(&self) -> bool;
}

/// Session signal fed by the device shell (network reachability and sign-in changes).
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
    user: watch::Sender<Option<String>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        let (user, _) = watch::channel(None);
        Self { online, user }
    }

    /// Record a reachability change. Returns true if the value flipped.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Connectivity changed: online={}", online);
        }
        changed
    }

    pub fn set_current_user(&self, user: Option<String>) {
        self.user.send_replace(user);
    }

    /// Receiver that wakes on every reachability flip.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SessionSignal for ConnectivityMonitor {
    fn current_user(&self) -> Option<String> {
        self.user.borrow().clone()
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }
}
