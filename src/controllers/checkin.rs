use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::error::ApiError;
use crate::services::checkin::CheckInService;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkin/scan", post(scan_ticket))
        .route("/checkin/stats/{event_id}", get(event_stats))
}

/* ---------- CHECK-IN ---------- */

// POST /api/checkin/scan
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[validate(length(min = 1, message = "ticketCode не может быть пустым"))]
    pub ticket_code: String,
    pub event_id: i64,
    pub staff_id: i64,
}

async fn scan_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let service = CheckInService::from_state(&state);
    let ticket = service
        .scan(&req.ticket_code, req.event_id, req.staff_id)
        .await?;

    Ok(Json(json!({ "ticket": ticket })))
}

// GET /api/checkin/stats/{event_id}
async fn event_stats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let service = CheckInService::from_state(&state);
    let stats = service.stats(event_id).await?;
    Ok(Json(stats))
}
