use std::sync::Arc;
use tourops_core::ConnectivityMonitor;
use tourops_store::EventBus;
use tourops_sync::SyncEngine;

use crate::metrics::QueueMetrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub events: EventBus,
    pub metrics: Arc<QueueMetrics>,
    pub auth: AuthConfig,
}
