use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Issued,
    CheckedIn,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Issued => "issued",
            TicketStatus::CheckedIn => "checked_in",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TicketStatus::Pending),
            "issued" => Some(TicketStatus::Issued),
            "checked_in" => Some(TicketStatus::CheckedIn),
            "cancelled" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }

    /// Допустимые переходы: pending→issued→checked_in, pending|issued→cancelled.
    /// Регрессий нет, из checked_in и cancelled выхода нет.
    pub fn can_transition(self, to: TicketStatus) -> bool {
        matches!(
            (self, to),
            (TicketStatus::Pending, TicketStatus::Issued)
                | (TicketStatus::Issued, TicketStatus::CheckedIn)
                | (TicketStatus::Pending, TicketStatus::Cancelled)
                | (TicketStatus::Issued, TicketStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub order_id: i64,
    pub event_id: i64,
    pub ticket_type_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<i64>,
    pub ticket_code: String,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_by: Option<i64>,
}

impl Ticket {
    /// Полезная нагрузка QR-кода: `<origin>/t/<ticket_code>`.
    pub fn qr_url(&self, frontend_origin: &str) -> String {
        format!("{}/t/{}", frontend_origin.trim_end_matches('/'), self.ticket_code)
    }
}

/// Заготовка билета до вставки; один билет на каждую купленную единицу.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub seat_id: Option<i64>,
    pub table_id: Option<i64>,
    pub ticket_code: String,
}

/// Непрозрачный код билета: 32 hex-символа, безопасен в path-сегменте URL.
pub fn new_ticket_code() -> String {
    Uuid::new_v4().simple().to_string()
}
