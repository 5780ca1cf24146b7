use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tourops_manifest::ManifestError;
use tourops_sync::SyncError;

// ============================================================================
// Handler Error
// ============================================================================

/// Handler error; the wrapped cause decides the status code.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    /// Map a handler failure to a status code and a message safe to show the operator.
    fn classify(err: anyhow::Error) -> (StatusCode, String) {
        let Some(sync) = err.downcast_ref::<SyncError>() else {
            tracing::error!("Internal Server Error: {:#}", err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string());
        };

        match sync {
            // Bad tour code, booking ref or passenger state: never retried.
            e if e.is_validation() => (StatusCode::BAD_REQUEST, e.to_string()),
            SyncError::Manifest(ManifestError::TourNotFound(_)) => (StatusCode::NOT_FOUND, sync.to_string()),
            // Only reachable when the store fails outside the queueing path (reads, joins).
            SyncError::Manifest(e) if e.is_retryable() => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            // The mutation was neither applied nor queued; say so.
            SyncError::Queue(e) => {
                tracing::error!("Queue persistence failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Update was not saved: {}", e))
            }
            other => {
                tracing::error!("Internal Server Error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        }
    }
}

// ============================================================================
// Response Conversion
// ============================================================================

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = Self::classify(self.0);

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
