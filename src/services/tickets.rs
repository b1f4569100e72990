//! Ticket Lifecycle: pending → issued → checked_in, с ветками отмены.
//!
//! Каждый переход — условный UPDATE в Record Store; проигравший гонку
//! вызов перечитывает билет и объясняет отказ конкретной ошибкой, а не
//! общим «не получилось».

use chrono::Utc;
use tracing::{error, info};

use crate::error::ApiError;
use crate::models::{Ticket, TicketStatus};
use crate::store::{RecordStore, StoreError};

#[derive(Clone)]
pub struct TicketLifecycle {
    store: RecordStore,
}

impl TicketLifecycle {
    pub fn new(store: RecordStore) -> Self {
        TicketLifecycle { store }
    }

    /// Выпуск одного билета (pending → issued).
    pub async fn issue(&self, ticket_id: i64) -> Result<Ticket, ApiError> {
        if self.store.issue_ticket(ticket_id).await? {
            return self.fetch(ticket_id).await;
        }

        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(ApiError::TicketNotFound)?;
        Err(self.transition_rejected(&ticket, "issue"))
    }

    /// Массовый выпуск всех pending-билетов заказа; возвращает число
    /// выпущенных.
    pub async fn issue_order(&self, order_id: i64) -> Result<u64, ApiError> {
        let issued = self.store.issue_order_tickets(order_id).await?;
        info!("issued {issued} tickets for order {order_id}");
        Ok(issued)
    }

    /// Идемпотентный по исходу check-in: ровно один из конкурентных
    /// вызовов побеждает, остальные получают AlreadyCheckedIn.
    pub async fn check_in(&self, ticket_id: i64, staff_id: i64) -> Result<Ticket, ApiError> {
        let now = Utc::now();
        if self.store.check_in_ticket(ticket_id, staff_id, now).await? {
            return self.fetch(ticket_id).await;
        }

        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(ApiError::TicketNotFound)?;
        match ticket.status {
            TicketStatus::CheckedIn => Err(ApiError::AlreadyCheckedIn),
            TicketStatus::Pending | TicketStatus::Cancelled => Err(ApiError::TicketNotIssued),
            // CAS проиграл, а билет всё ещё issued - так не бывает
            TicketStatus::Issued => Err(self.transition_rejected(&ticket, "check_in")),
        }
    }

    /// Административная отмена одного билета (pending|issued → cancelled).
    pub async fn cancel(&self, ticket_id: i64) -> Result<Ticket, ApiError> {
        if self.store.cancel_ticket(ticket_id).await? {
            return self.fetch(ticket_id).await;
        }

        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(ApiError::TicketNotFound)?;
        Err(self.transition_rejected(&ticket, "cancel"))
    }

    /// Массовая отмена билетов заказа; возвращает число отменённых.
    pub async fn cancel_order(&self, order_id: i64) -> Result<u64, ApiError> {
        let cancelled = self.store.cancel_order_tickets(order_id).await?;
        info!("cancelled {cancelled} tickets for order {order_id}");
        Ok(cancelled)
    }

    async fn fetch(&self, ticket_id: i64) -> Result<Ticket, ApiError> {
        self.store.ticket(ticket_id).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("ticket {ticket_id} vanished after update")).into()
        })
    }

    fn transition_rejected(&self, ticket: &Ticket, op: &str) -> ApiError {
        let detail = format!("{op} on {} ticket {}", ticket.status.as_str(), ticket.id);
        error!("ticket transition rejected: {detail}");
        ApiError::InvalidTransition(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOrder, NewTicket, TicketCategory, TicketType};
    use crate::store::MemoryStore;

    fn seeded() -> (RecordStore, Ticket) {
        let mem = MemoryStore::new();
        let now = Utc::now();
        mem.insert_ticket_type(TicketType {
            id: 10,
            event_id: 1,
            name: "Партер".into(),
            category: TicketCategory::Seated,
            price_minor: 1_200_000,
            currency: "KZT".into(),
            remaining_quantity: 100,
            max_per_order: 6,
            sales_start: now - chrono::Duration::hours(1),
            sales_end: now + chrono::Duration::hours(1),
        })
        .unwrap();
        let (_, tickets) = mem
            .insert_order(
                NewOrder {
                    user_id: 7,
                    event_id: 1,
                    line_items: vec![],
                    total_amount_minor: 1_200_000,
                    currency: "KZT".into(),
                    attendee_name: "Алия Н.".into(),
                    attendee_email: "aliya@example.kz".into(),
                    attendee_phone: None,
                },
                vec![NewTicket {
                    event_id: 1,
                    ticket_type_id: 10,
                    seat_id: Some(11),
                    table_id: None,
                    ticket_code: crate::models::new_ticket_code(),
                }],
            )
            .unwrap();
        (RecordStore::Memory(mem), tickets.into_iter().next().unwrap())
    }

    #[tokio::test]
    async fn issue_then_check_in_happy_path() {
        let (store, ticket) = seeded();
        let lifecycle = TicketLifecycle::new(store);

        let issued = lifecycle.issue(ticket.id).await.unwrap();
        assert_eq!(issued.status, TicketStatus::Issued);

        let checked = lifecycle.check_in(ticket.id, 900).await.unwrap();
        assert_eq!(checked.status, TicketStatus::CheckedIn);
        assert_eq!(checked.checked_in_by, Some(900));
        assert!(checked.checked_in_at.is_some());
    }

    #[tokio::test]
    async fn second_check_in_reports_already_checked_in() {
        let (store, ticket) = seeded();
        let lifecycle = TicketLifecycle::new(store);

        lifecycle.issue(ticket.id).await.unwrap();
        let first = lifecycle.check_in(ticket.id, 900).await.unwrap();
        let second = lifecycle.check_in(ticket.id, 901).await;

        assert!(matches!(second, Err(ApiError::AlreadyCheckedIn)));
        // отметка первого победителя не перезаписана
        let current = lifecycle.fetch(ticket.id).await.unwrap();
        assert_eq!(current.checked_in_by, first.checked_in_by);
        assert_eq!(current.checked_in_at, first.checked_in_at);
    }

    #[tokio::test]
    async fn check_in_of_pending_ticket_is_rejected() {
        let (store, ticket) = seeded();
        let lifecycle = TicketLifecycle::new(store);

        let result = lifecycle.check_in(ticket.id, 900).await;
        assert!(matches!(result, Err(ApiError::TicketNotIssued)));
    }

    #[tokio::test]
    async fn cancelled_ticket_cannot_come_back() {
        let (store, ticket) = seeded();
        let lifecycle = TicketLifecycle::new(store);

        lifecycle.cancel(ticket.id).await.unwrap();
        assert!(matches!(
            lifecycle.issue(ticket.id).await,
            Err(ApiError::InvalidTransition(_))
        ));
        assert!(matches!(
            lifecycle.check_in(ticket.id, 900).await,
            Err(ApiError::TicketNotIssued)
        ));
        assert!(matches!(
            lifecycle.cancel(ticket.id).await,
            Err(ApiError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn missing_ticket_is_not_found() {
        let (store, _) = seeded();
        let lifecycle = TicketLifecycle::new(store);
        assert!(matches!(
            lifecycle.check_in(999, 900).await,
            Err(ApiError::TicketNotFound)
        ));
    }
}
