//! Record Store: система записи для заказов, билетов и типов билетов.
//!
//! Два бэкенда за одним перечислением:
//! - `Postgres` — продакшен; каждая смена статуса и декремент остатка
//!   выражены одним условным UPDATE с проверкой affected rows, поэтому
//!   корректность сохраняется при любом числе инстансов сервиса.
//! - `Memory` — один процесс: локальная разработка, нагрузочные прогоны и
//!   тесты. Все операции выполняются под одним мьютексом и поэтому
//!   линеаризуемы по ключу так же, как условные UPDATE в Postgres.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{NewOrder, NewTicket, Order, OrderStatus, Ticket, TicketCategory, TicketType};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Запись в хранилище не соответствует ожидаемой форме (например,
    /// неизвестная строка статуса). Такие записи отклоняются на границе.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Ресурс уже прикреплён к живому билету (уникальный индекс сработал).
    #[error("resource is already attached to a live ticket")]
    ResourceConflict { resource_id: Option<i64> },
}

#[derive(Clone)]
pub enum RecordStore {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl RecordStore {
    pub fn memory() -> Self {
        RecordStore::Memory(MemoryStore::new())
    }

    // --- типы билетов ---

    pub async fn ticket_type(&self, id: i64) -> Result<Option<TicketType>, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.ticket_type(id).await,
            RecordStore::Memory(s) => s.ticket_type(id),
        }
    }

    /// Посев каталога (фикстуры в memory-режиме, тесты).
    pub async fn insert_ticket_type(&self, tt: TicketType) -> Result<(), StoreError> {
        match self {
            RecordStore::Postgres(s) => s.insert_ticket_type(tt).await,
            RecordStore::Memory(s) => s.insert_ticket_type(tt),
        }
    }

    /// Атомарный check-and-decrement; `false` — остатка не хватило.
    pub async fn decrement_remaining(&self, id: i64, qty: i64) -> Result<bool, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.decrement_remaining(id, qty).await,
            RecordStore::Memory(s) => s.decrement_remaining(id, qty),
        }
    }

    pub async fn restore_remaining(&self, id: i64, qty: i64) -> Result<(), StoreError> {
        match self {
            RecordStore::Postgres(s) => s.restore_remaining(id, qty).await,
            RecordStore::Memory(s) => s.restore_remaining(id, qty),
        }
    }

    // --- заказы ---

    /// Заказ и все его билеты вставляются атомарно: либо всё, либо ничего.
    pub async fn insert_order(
        &self,
        order: NewOrder,
        tickets: Vec<NewTicket>,
    ) -> Result<(Order, Vec<Ticket>), StoreError> {
        match self {
            RecordStore::Postgres(s) => s.insert_order(order, tickets).await,
            RecordStore::Memory(s) => s.insert_order(order, tickets),
        }
    }

    pub async fn order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.order(id).await,
            RecordStore::Memory(s) => s.order(id),
        }
    }

    /// Условный переход статуса заказа; `false` — текущий статус не `from`.
    pub async fn transition_order(
        &self,
        id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.transition_order(id, from, to).await,
            RecordStore::Memory(s) => s.transition_order(id, from, to),
        }
    }

    /// Инкремент счётчика попыток оплаты, возвращает новое значение.
    pub async fn bump_payment_attempts(&self, id: i64) -> Result<i32, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.bump_payment_attempts(id).await,
            RecordStore::Memory(s) => s.bump_payment_attempts(id),
        }
    }

    pub async fn expired_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.expired_pending_orders(cutoff, limit).await,
            RecordStore::Memory(s) => s.expired_pending_orders(cutoff, limit),
        }
    }

    // --- билеты ---

    pub async fn ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.ticket(id).await,
            RecordStore::Memory(s) => s.ticket(id),
        }
    }

    pub async fn ticket_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.ticket_by_code(code).await,
            RecordStore::Memory(s) => s.ticket_by_code(code),
        }
    }

    pub async fn order_tickets(&self, order_id: i64) -> Result<Vec<Ticket>, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.order_tickets(order_id).await,
            RecordStore::Memory(s) => s.order_tickets(order_id),
        }
    }

    /// CAS pending→issued для одного билета.
    pub async fn issue_ticket(&self, id: i64) -> Result<bool, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.issue_ticket(id).await,
            RecordStore::Memory(s) => s.issue_ticket(id),
        }
    }

    /// CAS issued→checked_in, одновременно проставляет отметку времени и
    /// сотрудника. Ровно один из конкурентных вызовов получит `true`.
    pub async fn check_in_ticket(
        &self,
        id: i64,
        staff_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.check_in_ticket(id, staff_id, at).await,
            RecordStore::Memory(s) => s.check_in_ticket(id, staff_id, at),
        }
    }

    /// CAS pending|issued→cancelled.
    pub async fn cancel_ticket(&self, id: i64) -> Result<bool, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.cancel_ticket(id).await,
            RecordStore::Memory(s) => s.cancel_ticket(id),
        }
    }

    /// Массовый выпуск всех pending-билетов заказа одним условным UPDATE.
    pub async fn issue_order_tickets(&self, order_id: i64) -> Result<u64, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.issue_order_tickets(order_id).await,
            RecordStore::Memory(s) => s.issue_order_tickets(order_id),
        }
    }

    pub async fn cancel_order_tickets(&self, order_id: i64) -> Result<u64, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.cancel_order_tickets(order_id).await,
            RecordStore::Memory(s) => s.cancel_order_tickets(order_id),
        }
    }

    /// Есть ли неотменённый билет, уже занимающий место/стол.
    pub async fn resource_bound(
        &self,
        event_id: i64,
        category: TicketCategory,
        resource_id: i64,
    ) -> Result<bool, StoreError> {
        match self {
            RecordStore::Postgres(s) => s.resource_bound(event_id, category, resource_id).await,
            RecordStore::Memory(s) => s.resource_bound(event_id, category, resource_id),
        }
    }

    /// (выпущено+отмечено, отмечено) по событию для статистики check-in.
    pub async fn event_ticket_stats(&self, event_id: i64) -> Result<(i64, i64), StoreError> {
        match self {
            RecordStore::Postgres(s) => s.event_ticket_stats(event_id).await,
            RecordStore::Memory(s) => s.event_ticket_stats(event_id),
        }
    }
}
