use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/holds", post(place_hold))
        .route("/holds/release", post(release_holds))
        .route("/holds/{event_id}", get(list_holds))
}

/* ---------- HOLDS ---------- */

// POST /api/holds
//
// Конфликт отдаём как 409 с тем же телом, что и ApiError: для клиента
// выбора мест это ожидаемый исход, а не ошибка запроса.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    pub event_id: i64,
    pub resource_id: i64,
    pub holder_id: i64,
}

async fn place_hold(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = state.config.reservations.hold_ttl();
    let granted = state
        .reservations
        .reserve(req.event_id, req.resource_id, req.holder_id, ttl)
        .await;

    if !granted {
        return Ok((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "ReservationConflict",
                "message": format!("resource {} is held by another customer", req.resource_id),
            })),
        ));
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "resourceId": req.resource_id,
            "expiresInSeconds": ttl.as_secs(),
        })),
    ))
}

// POST /api/holds/release
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub event_id: i64,
    pub resource_ids: Vec<i64>,
}

async fn release_holds(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReleaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .reservations
        .release_many(req.event_id, &req.resource_ids)
        .await;

    Ok(Json(json!({
        "success": true,
        "released": req.resource_ids.len(),
    })))
}

// GET /api/holds/{event_id}?holderId=42
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldsQuery {
    pub holder_id: Option<i64>,
}

async fn list_holds(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
    Query(query): Query<HoldsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let resource_ids = state
        .reservations
        .reserved_for_event(event_id, query.holder_id)
        .await;

    Ok(Json(json!({ "resourceIds": resource_ids })))
}
