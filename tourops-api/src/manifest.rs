use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use tourops_manifest::TourManifest;
use tourops_sync::{ManifestUpdateOutcome, UpdateOptions};

use crate::error::AppError;
use crate::middleware::OperatorClaims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    pub passenger_states: Vec<String>,
    /// When the change was made on the device, epoch ms.
    pub last_updated: Option<i64>,
    pub idempotency_key: Option<String>,
}

pub async fn update_booking(
    State(state): State<AppState>,
    Path((tour_code, booking_ref)): Path<(String, String)>,
    Extension(claims): Extension<OperatorClaims>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<Json<ManifestUpdateOutcome>, AppError> {
    let outcome = state
        .engine
        .update_manifest_booking(
            &tour_code,
            &booking_ref,
            req.passenger_states.as_slice(),
            UpdateOptions {
                last_updated: req.last_updated,
                idempotency_key: req.idempotency_key,
                author: Some(claims.sub),
            },
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn get_manifest(
    State(state): State<AppState>,
    Path(tour_code): Path<String>,
) -> Result<Json<TourManifest>, AppError> {
    Ok(Json(state.engine.get_tour_manifest(&tour_code).await?))
}
