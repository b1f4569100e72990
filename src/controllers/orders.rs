use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::error::ApiError;
use crate::models::{LineItem, Ticket};
use crate::services::orders::{CreateOrder, OrderLifecycle};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/confirm", post(confirm_order))
        .route("/orders/{id}/cancel", post(cancel_order))
}

/* ---------- helpers ---------- */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TicketView {
    #[serde(flatten)]
    ticket: Ticket,
    qr_url: String,
}

fn ticket_views(tickets: Vec<Ticket>, frontend_origin: &str) -> Vec<TicketView> {
    tickets
        .into_iter()
        .map(|t| TicketView {
            qr_url: t.qr_url(frontend_origin),
            ticket: t,
        })
        .collect()
}

/* ---------- ORDERS ---------- */

// POST /api/orders
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub event_id: i64,
    #[validate(length(min = 1, message = "заказ должен содержать хотя бы одну позицию"), nested)]
    pub line_items: Vec<LineItemRequest>,
    #[validate(length(min = 1, max = 200))]
    pub attendee_name: String,
    #[validate(email)]
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRequest {
    pub ticket_type_id: i64,
    #[validate(range(min = 1, message = "quantity должен быть > 0"))]
    pub quantity: i64,
    #[serde(default)]
    pub seat_ids: Vec<i64>,
    #[serde(default)]
    pub table_ids: Vec<i64>,
}

impl CreateOrderRequest {
    fn into_create(self) -> CreateOrder {
        CreateOrder {
            user_id: self.user_id,
            event_id: self.event_id,
            line_items: self
                .line_items
                .into_iter()
                .map(|li| LineItem {
                    ticket_type_id: li.ticket_type_id,
                    quantity: li.quantity,
                    seat_ids: li.seat_ids,
                    table_ids: li.table_ids,
                })
                .collect(),
            attendee_name: self.attendee_name,
            attendee_email: self.attendee_email,
            attendee_phone: self.attendee_phone,
        }
    }
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let lifecycle = OrderLifecycle::from_state(&state);
    let (order, tickets, payment) = lifecycle.create_order(req.into_create()).await?;
    let tickets = ticket_views(tickets, &state.config.app.frontend_origin);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "order": order,
            "tickets": tickets,
            "paymentInitData": payment,
        })),
    ))
}

// GET /api/orders/{id}
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.store.order(id).await?.ok_or(ApiError::OrderNotFound)?;
    let tickets = state.store.order_tickets(id).await?;
    let tickets = ticket_views(tickets, &state.config.app.frontend_origin);

    Ok(Json(json!({ "order": order, "tickets": tickets })))
}

// POST /api/orders/{id}/confirm
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderRequest {
    #[validate(length(min = 1))]
    pub provider_ref: String,
    #[validate(length(min = 1))]
    pub provider_signature: String,
}

async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ConfirmOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let lifecycle = OrderLifecycle::from_state(&state);
    let order = lifecycle
        .confirm_order(id, &req.provider_ref, &req.provider_signature)
        .await?;

    Ok(Json(json!({
        "success": true,
        "orderId": order.id,
        "status": order.status,
    })))
}

// POST /api/orders/{id}/cancel
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub user_id: i64,
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.store.order(id).await?.ok_or(ApiError::OrderNotFound)?;
    if order.user_id != req.user_id {
        return Err(ApiError::Forbidden);
    }

    let lifecycle = OrderLifecycle::from_state(&state);
    let order = lifecycle.cancel_order(id, "cancelled by customer").await?;

    Ok(Json(json!({
        "success": true,
        "orderId": order.id,
        "status": order.status,
    })))
}
