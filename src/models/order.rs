use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Из `paid` и `cancelled` переходов нет.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub ticket_type_id: i64,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seat_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_ids: Vec<i64>,
}

impl LineItem {
    /// Все конкретные ресурсы позиции (места и столы) одним списком.
    pub fn resource_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.seat_ids.iter().chain(self.table_ids.iter()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub status: OrderStatus,
    pub line_items: Vec<LineItem>,
    pub total_amount_minor: i64,
    pub currency: String,
    pub attendee_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
    pub payment_attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Все ресурсы заказа по всем позициям, чтобы освободить холды разом.
    pub fn resource_ids(&self) -> Vec<i64> {
        self.line_items.iter().flat_map(LineItem::resource_ids).collect()
    }
}

/// Заготовка заказа до вставки: id и created_at назначает Record Store.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub event_id: i64,
    pub line_items: Vec<LineItem>,
    pub total_amount_minor: i64,
    pub currency: String,
    pub attendee_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
}
