//! Check-In: сканирование билетов на входе и статистика по событию.
//!
//! Сканер шлёт непрозрачный код билета; порядок проверок фиксированный:
//! существование, принадлежность событию, затем CAS issued→checked_in.
//! Повторный скан того же билета — штатный случай (AlreadyCheckedIn),
//! а не сбой.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::models::Ticket;
use crate::services::notify::{Notification, Notifier};
use crate::services::tickets::TicketLifecycle;
use crate::store::RecordStore;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInStats {
    /// Билеты, которые могут пройти или уже прошли (issued + checked_in).
    pub total: i64,
    pub checked_in: i64,
    pub remaining: i64,
}

#[derive(Clone)]
pub struct CheckInService {
    store: RecordStore,
    tickets: TicketLifecycle,
    notifier: Notifier,
}

impl CheckInService {
    pub fn new(store: RecordStore, notifier: Notifier) -> Self {
        CheckInService {
            tickets: TicketLifecycle::new(store.clone()),
            store,
            notifier,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        CheckInService::new(state.store.clone(), state.notifier.clone())
    }

    /// Скан на входе. Код ищется по всему хранилищу, затем сверяется
    /// событие: билет соседнего зала отклоняется до попытки перехода.
    pub async fn scan(
        &self,
        ticket_code: &str,
        event_id: i64,
        staff_id: i64,
    ) -> Result<Ticket, ApiError> {
        let ticket = self
            .store
            .ticket_by_code(ticket_code)
            .await?
            .ok_or(ApiError::TicketNotFound)?;

        if ticket.event_id != event_id {
            warn!(
                "ticket {} scanned at event {event_id} but belongs to event {}",
                ticket.id, ticket.event_id
            );
            return Err(ApiError::EventMismatch);
        }

        let ticket = self.tickets.check_in(ticket.id, staff_id).await?;
        self.notifier.notify(Notification::TicketCheckedIn {
            ticket_id: ticket.id,
            event_id,
            staff_id,
        });
        info!("🎟️ ticket {} checked in by staff {staff_id}", ticket.id);
        Ok(ticket)
    }

    pub async fn stats(&self, event_id: i64) -> Result<CheckInStats, ApiError> {
        let (total, checked_in) = self.store.event_ticket_stats(event_id).await?;
        Ok(CheckInStats {
            total,
            checked_in,
            remaining: total - checked_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOrder, NewTicket, TicketCategory, TicketStatus, TicketType};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn seeded(event_id: i64) -> (RecordStore, Vec<Ticket>) {
        let mem = MemoryStore::new();
        let now = Utc::now();
        mem.insert_ticket_type(TicketType {
            id: 10,
            event_id,
            name: "Стандарт".into(),
            category: TicketCategory::Ga,
            price_minor: 400_000,
            currency: "KZT".into(),
            remaining_quantity: 100,
            max_per_order: 10,
            sales_start: now - chrono::Duration::hours(1),
            sales_end: now + chrono::Duration::hours(1),
        })
        .unwrap();

        let tickets: Vec<NewTicket> = (0..3)
            .map(|_| NewTicket {
                event_id,
                ticket_type_id: 10,
                seat_id: None,
                table_id: None,
                ticket_code: crate::models::new_ticket_code(),
            })
            .collect();
        let (order, tickets) = mem
            .insert_order(
                NewOrder {
                    user_id: 7,
                    event_id,
                    line_items: vec![],
                    total_amount_minor: 1_200_000,
                    currency: "KZT".into(),
                    attendee_name: "Гость".into(),
                    attendee_email: "guest@example.kz".into(),
                    attendee_phone: None,
                },
                tickets,
            )
            .unwrap();
        mem.issue_order_tickets(order.id).unwrap();
        let tickets = mem.order_tickets(order.id).unwrap();
        (RecordStore::Memory(mem), tickets)
    }

    fn service(store: &RecordStore) -> CheckInService {
        let (notifier, _inbox) = Notifier::channel(16);
        CheckInService::new(store.clone(), notifier)
    }

    #[tokio::test]
    async fn scan_checks_in_issued_ticket_once() {
        let (store, tickets) = seeded(1);
        let svc = service(&store);
        let code = tickets[0].ticket_code.clone();

        let checked = svc.scan(&code, 1, 900).await.unwrap();
        assert_eq!(checked.status, TicketStatus::CheckedIn);

        let again = svc.scan(&code, 1, 901).await;
        assert!(matches!(again, Err(ApiError::AlreadyCheckedIn)));
    }

    #[tokio::test]
    async fn scan_rejects_unknown_code_and_foreign_event() {
        let (store, tickets) = seeded(1);
        let svc = service(&store);

        assert!(matches!(
            svc.scan("ffffffffffffffffffffffffffffffff", 1, 900).await,
            Err(ApiError::TicketNotFound)
        ));
        assert!(matches!(
            svc.scan(&tickets[0].ticket_code, 2, 900).await,
            Err(ApiError::EventMismatch)
        ));
    }

    #[tokio::test]
    async fn stats_track_check_in_progress() {
        let (store, tickets) = seeded(1);
        let svc = service(&store);

        assert_eq!(
            svc.stats(1).await.unwrap(),
            CheckInStats { total: 3, checked_in: 0, remaining: 3 }
        );

        svc.scan(&tickets[0].ticket_code, 1, 900).await.unwrap();
        svc.scan(&tickets[1].ticket_code, 1, 900).await.unwrap();

        assert_eq!(
            svc.stats(1).await.unwrap(),
            CheckInStats { total: 3, checked_in: 2, remaining: 1 }
        );

        // чужое событие пустое
        assert_eq!(
            svc.stats(99).await.unwrap(),
            CheckInStats { total: 0, checked_in: 0, remaining: 0 }
        );
    }
}
