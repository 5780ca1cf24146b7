use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::{Stream, StreamExt};
use tourops_shared::ReplaySummary;
use tourops_sync::QueuedAction;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub success: bool,
    pub summary: ReplaySummary,
}

#[derive(Debug, Serialize)]
pub struct QueuedActionsResponse {
    pub success: bool,
    pub data: Vec<QueuedAction>,
}

pub async fn replay(State(state): State<AppState>) -> Result<Json<ReplayResponse>, AppError> {
    let summary = state.engine.replay_queue().await?;
    Ok(Json(ReplayResponse {
        success: true,
        summary,
    }))
}

pub async fn retry_failed(State(state): State<AppState>) -> Result<Json<ReplayResponse>, AppError> {
    let summary = state.engine.retry_failed_now().await?;
    Ok(Json(ReplayResponse {
        success: true,
        summary,
    }))
}

pub async fn list_actions(State(state): State<AppState>) -> Json<QueuedActionsResponse> {
    Json(QueuedActionsResponse {
        success: true,
        data: state.engine.queued_actions().await,
    })
}

/// Queue counts on every change (`queue` events) interleaved with operator notices (`notice` events).
pub async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let counts = WatchStream::new(state.engine.queue_state())
        .map(|counts| Event::default().event("queue").json_data(counts));

    let notices = BroadcastStream::new(state.events.subscribe())
        .filter_map(|notice| notice.ok())
        .map(|notice| Event::default().event("notice").json_data(notice));

    Sse::new(counts.merge(notices)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}
