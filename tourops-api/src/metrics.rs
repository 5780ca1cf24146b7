use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use tourops_shared::QueueCounts;

use crate::error::AppError;
use crate::state::AppState;

/// Queue-depth gauges exported for Prometheus scraping.
pub struct QueueMetrics {
    registry: Registry,
    pending: IntGauge,
    syncing: IntGauge,
    failed: IntGauge,
    total: IntGauge,
}

impl QueueMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(Self {
            pending: gauge("tourops_queue_pending", "Queued actions waiting for replay")?,
            syncing: gauge("tourops_queue_syncing", "Queued actions currently being replayed")?,
            failed: gauge("tourops_queue_failed", "Queued actions whose last attempt failed")?,
            total: gauge("tourops_queue_total", "Unconfirmed queued actions")?,
            registry,
        })
    }

    pub fn observe(&self, counts: QueueCounts) {
        self.pending.set(counts.pending as i64);
        self.syncing.set(counts.syncing as i64);
        self.failed.set(counts.failed as i64);
        self.total.set(counts.total as i64);
    }

    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub async fn export_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.metrics.observe(state.engine.queue_counts());
    let body = state.metrics.export()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_reports_counts() {
        let metrics = QueueMetrics::new().unwrap();
        metrics.observe(QueueCounts { pending: 2, syncing: 1, failed: 1, total: 4 });
        let text = metrics.export().unwrap();
        assert!(text.contains("tourops_queue_pending 2"));
        assert!(text.contains("tourops_queue_total 4"));
    }
}
