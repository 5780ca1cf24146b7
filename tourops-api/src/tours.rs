use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;

use crate::error::AppError;
use crate::middleware::OperatorClaims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTourResponse {
    pub current_participants: u64,
    pub already_joined: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub current_participants: u64,
    pub corrected: bool,
}

pub async fn join_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Extension(claims): Extension<OperatorClaims>,
) -> Result<Json<JoinTourResponse>, AppError> {
    let outcome = state.engine.join_tour(&tour_id, &claims.sub).await?;
    Ok(Json(JoinTourResponse {
        current_participants: outcome.current_participants,
        already_joined: outcome.already_joined,
    }))
}

pub async fn reconcile_participants(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let outcome = state.engine.ensure_participant_count(&tour_id).await?;
    Ok(Json(ReconcileResponse {
        current_participants: outcome.current_participants,
        corrected: outcome.corrected,
    }))
}
