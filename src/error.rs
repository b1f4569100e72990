//! Единая таксономия ошибок API.
//!
//! Каждый вариант несёт машинно-читаемый `kind` (стабильная строка для
//! клиентов) и HTTP-статус. Тело ответа всегда одной формы:
//! `{"error": "<kind>", "message": "<текст>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not enough tickets remaining for ticket type {ticket_type_id}")]
    InsufficientInventory { ticket_type_id: i64 },

    #[error("sales window for ticket type {ticket_type_id} is closed")]
    SalesWindowClosed { ticket_type_id: i64 },

    #[error("quantity exceeds the per-order limit of {max}")]
    OrderLimitExceeded { max: i64 },

    #[error("resource {resource_id} is held by another customer")]
    ReservationConflict { resource_id: i64 },

    #[error("hold on resource {resource_id} is missing or expired")]
    ReservationExpired { resource_id: i64 },

    #[error("resource {} is already attached to a live ticket", display_resource(.resource_id))]
    SeatTaken { resource_id: Option<i64> },

    #[error("line items must use a single currency")]
    CurrencyMismatch,

    #[error("payment verification failed")]
    PaymentVerificationFailed,

    #[error("payment verifier is unavailable")]
    VerifierUnavailable,

    #[error("order has already been processed")]
    AlreadyProcessed,

    #[error("order not found")]
    OrderNotFound,

    #[error("ticket type {ticket_type_id} not found")]
    TicketTypeNotFound { ticket_type_id: i64 },

    #[error("ticket not found")]
    TicketNotFound,

    #[error("ticket belongs to a different event")]
    EventMismatch,

    #[error("ticket is already checked in")]
    AlreadyCheckedIn,

    #[error("ticket has not been issued")]
    TicketNotIssued,

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("{0}")]
    Validation(String),

    #[error("order belongs to a different customer")]
    Forbidden,

    #[error("storage error")]
    Store(#[source] StoreError),
}

fn display_resource(id: &Option<i64>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "in the request".to_string(),
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ResourceConflict { resource_id } => ApiError::SeatTaken { resource_id },
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    /// Стабильный код для клиентов; не менять без версии API.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InsufficientInventory { .. } => "InsufficientInventory",
            ApiError::SalesWindowClosed { .. } => "SalesWindowClosed",
            ApiError::OrderLimitExceeded { .. } => "OrderLimitExceeded",
            ApiError::ReservationConflict { .. } => "ReservationConflict",
            ApiError::ReservationExpired { .. } => "ReservationExpired",
            ApiError::SeatTaken { .. } => "SeatTaken",
            ApiError::CurrencyMismatch => "CurrencyMismatch",
            ApiError::PaymentVerificationFailed => "PaymentVerificationFailed",
            ApiError::VerifierUnavailable => "VerifierUnavailable",
            ApiError::AlreadyProcessed => "AlreadyProcessed",
            ApiError::OrderNotFound => "OrderNotFound",
            ApiError::TicketTypeNotFound { .. } => "TicketTypeNotFound",
            ApiError::TicketNotFound => "TicketNotFound",
            ApiError::EventMismatch => "EventMismatch",
            ApiError::AlreadyCheckedIn => "AlreadyCheckedIn",
            ApiError::TicketNotIssued => "TicketNotIssued",
            ApiError::InvalidTransition(_) => "InvalidTransition",
            ApiError::Validation(_) => "Validation",
            ApiError::Forbidden => "Forbidden",
            ApiError::Store(_) => "Internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InsufficientInventory { .. }
            | ApiError::SalesWindowClosed { .. }
            | ApiError::OrderLimitExceeded { .. }
            | ApiError::ReservationConflict { .. }
            | ApiError::ReservationExpired { .. }
            | ApiError::SeatTaken { .. }
            | ApiError::CurrencyMismatch
            | ApiError::PaymentVerificationFailed
            | ApiError::AlreadyProcessed
            | ApiError::EventMismatch
            | ApiError::TicketNotIssued
            | ApiError::TicketTypeNotFound { .. }
            | ApiError::Validation(_) => StatusCode::BAD_REQUEST,

            ApiError::Forbidden => StatusCode::FORBIDDEN,

            ApiError::OrderNotFound | ApiError::TicketNotFound => StatusCode::NOT_FOUND,

            ApiError::AlreadyCheckedIn => StatusCode::CONFLICT,

            ApiError::VerifierUnavailable
            | ApiError::InvalidTransition(_)
            | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Текст для клиента; внутренние детали хранилища наружу не уходят.
    fn public_message(&self) -> String {
        match self {
            ApiError::Store(_) => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(e) => error!("storage error: {e}"),
            ApiError::InvalidTransition(detail) => error!("invalid transition: {detail}"),
            ApiError::VerifierUnavailable => error!("payment verifier unavailable"),
            // Повторный confirm уже оплаченного заказа — штатная ситуация.
            ApiError::AlreadyProcessed => info!("duplicate processing attempt rejected"),
            ApiError::AlreadyCheckedIn => info!("duplicate check-in rejected"),
            other => warn!("request rejected: {other}"),
        }

        let body = json!({
            "error": self.kind(),
            "message": self.public_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
