//! In-memory бэкенд Record Store.
//!
//! Одна структура под мьютексом; операции короткие и синхронные, так что
//! блокировка держится микросекунды. Семантика условных операций повторяет
//! Postgres-бэкенд один в один, чтобы тесты на memory ловили те же гонки.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::StoreError;
use crate::models::{
    NewOrder, NewTicket, Order, OrderStatus, Ticket, TicketCategory, TicketStatus, TicketType,
};

#[derive(Default)]
struct Inner {
    ticket_types: HashMap<i64, TicketType>,
    orders: HashMap<i64, Order>,
    tickets: HashMap<i64, Ticket>,
    next_order_id: i64,
    next_ticket_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn ticket_type(&self, id: i64) -> Result<Option<TicketType>, StoreError> {
        Ok(self.locked().ticket_types.get(&id).cloned())
    }

    pub fn insert_ticket_type(&self, tt: TicketType) -> Result<(), StoreError> {
        self.locked().ticket_types.insert(tt.id, tt);
        Ok(())
    }

    pub fn decrement_remaining(&self, id: i64, qty: i64) -> Result<bool, StoreError> {
        let mut inner = self.locked();
        match inner.ticket_types.get_mut(&id) {
            Some(tt) if tt.remaining_quantity >= qty => {
                tt.remaining_quantity -= qty;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn restore_remaining(&self, id: i64, qty: i64) -> Result<(), StoreError> {
        if let Some(tt) = self.locked().ticket_types.get_mut(&id) {
            tt.remaining_quantity += qty;
        }
        Ok(())
    }

    pub fn insert_order(
        &self,
        order: NewOrder,
        tickets: Vec<NewTicket>,
    ) -> Result<(Order, Vec<Ticket>), StoreError> {
        let mut inner = self.locked();

        // Аналог частичных уникальных индексов: ресурс не может быть
        // прикреплён к двум живым билетам одного события.
        for nt in &tickets {
            for (resource_id, taken) in [
                (nt.seat_id, seat_bound(&inner, nt.event_id)),
                (nt.table_id, table_bound(&inner, nt.event_id)),
            ] {
                if let Some(rid) = resource_id {
                    if taken.contains(&rid) {
                        return Err(StoreError::ResourceConflict {
                            resource_id: Some(rid),
                        });
                    }
                }
            }
        }

        inner.next_order_id += 1;
        let order_id = inner.next_order_id;
        let order = Order {
            id: order_id,
            user_id: order.user_id,
            event_id: order.event_id,
            status: OrderStatus::Pending,
            line_items: order.line_items,
            total_amount_minor: order.total_amount_minor,
            currency: order.currency,
            attendee_name: order.attendee_name,
            attendee_email: order.attendee_email,
            attendee_phone: order.attendee_phone,
            payment_attempts: 0,
            created_at: Utc::now(),
        };

        let mut stored = Vec::with_capacity(tickets.len());
        for nt in tickets {
            inner.next_ticket_id += 1;
            let ticket = Ticket {
                id: inner.next_ticket_id,
                order_id,
                event_id: nt.event_id,
                ticket_type_id: nt.ticket_type_id,
                seat_id: nt.seat_id,
                table_id: nt.table_id,
                ticket_code: nt.ticket_code,
                status: TicketStatus::Pending,
                checked_in_at: None,
                checked_in_by: None,
            };
            inner.tickets.insert(ticket.id, ticket.clone());
            stored.push(ticket);
        }
        inner.orders.insert(order_id, order.clone());

        Ok((order, stored))
    }

    pub fn order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.locked().orders.get(&id).cloned())
    }

    pub fn transition_order(
        &self,
        id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.locked();
        match inner.orders.get_mut(&id) {
            Some(o) if o.status == from => {
                o.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn bump_payment_attempts(&self, id: i64) -> Result<i32, StoreError> {
        let mut inner = self.locked();
        let order = inner
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("bump attempts on missing order {id}")))?;
        order.payment_attempts += 1;
        Ok(order.payment_attempts)
    }

    pub fn expired_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let inner = self.locked();
        let mut expired: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at <= cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|o| (o.created_at, o.id));
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    pub fn ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError> {
        Ok(self.locked().tickets.get(&id).cloned())
    }

    pub fn ticket_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self
            .locked()
            .tickets
            .values()
            .find(|t| t.ticket_code == code)
            .cloned())
    }

    pub fn order_tickets(&self, order_id: i64) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.locked();
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.id);
        Ok(tickets)
    }

    pub fn issue_ticket(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.locked();
        match inner.tickets.get_mut(&id) {
            Some(t) if t.status == TicketStatus::Pending => {
                t.status = TicketStatus::Issued;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn check_in_ticket(
        &self,
        id: i64,
        staff_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.locked();
        match inner.tickets.get_mut(&id) {
            Some(t) if t.status == TicketStatus::Issued => {
                t.status = TicketStatus::CheckedIn;
                t.checked_in_at = Some(at);
                t.checked_in_by = Some(staff_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn cancel_ticket(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.locked();
        match inner.tickets.get_mut(&id) {
            Some(t) if matches!(t.status, TicketStatus::Pending | TicketStatus::Issued) => {
                t.status = TicketStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn issue_order_tickets(&self, order_id: i64) -> Result<u64, StoreError> {
        let mut inner = self.locked();
        let mut issued = 0u64;
        for t in inner.tickets.values_mut() {
            if t.order_id == order_id && t.status == TicketStatus::Pending {
                t.status = TicketStatus::Issued;
                issued += 1;
            }
        }
        Ok(issued)
    }

    pub fn cancel_order_tickets(&self, order_id: i64) -> Result<u64, StoreError> {
        let mut inner = self.locked();
        let mut cancelled = 0u64;
        for t in inner.tickets.values_mut() {
            if t.order_id == order_id
                && matches!(t.status, TicketStatus::Pending | TicketStatus::Issued)
            {
                t.status = TicketStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub fn resource_bound(
        &self,
        event_id: i64,
        category: TicketCategory,
        resource_id: i64,
    ) -> Result<bool, StoreError> {
        let inner = self.locked();
        let bound = inner.tickets.values().any(|t| {
            t.event_id == event_id
                && t.status != TicketStatus::Cancelled
                && match category {
                    TicketCategory::Seated => t.seat_id == Some(resource_id),
                    TicketCategory::Table => t.table_id == Some(resource_id),
                    TicketCategory::Ga => false,
                }
        });
        Ok(bound)
    }

    pub fn event_ticket_stats(&self, event_id: i64) -> Result<(i64, i64), StoreError> {
        let inner = self.locked();
        let mut total = 0i64;
        let mut checked_in = 0i64;
        for t in inner.tickets.values().filter(|t| t.event_id == event_id) {
            match t.status {
                TicketStatus::Issued => total += 1,
                TicketStatus::CheckedIn => {
                    total += 1;
                    checked_in += 1;
                }
                _ => {}
            }
        }
        Ok((total, checked_in))
    }
}

fn seat_bound(inner: &Inner, event_id: i64) -> Vec<i64> {
    inner
        .tickets
        .values()
        .filter(|t| t.event_id == event_id && t.status != TicketStatus::Cancelled)
        .filter_map(|t| t.seat_id)
        .collect()
}

fn table_bound(inner: &Inner, event_id: i64) -> Vec<i64> {
    inner
        .tickets
        .values()
        .filter(|t| t.event_id == event_id && t.status != TicketStatus::Cancelled)
        .filter_map(|t| t.table_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seed_type(store: &MemoryStore, id: i64, remaining: i64) {
        let now = Utc::now();
        store
            .insert_ticket_type(TicketType {
                id,
                event_id: 1,
                name: format!("Тариф {id}"),
                category: TicketCategory::Ga,
                price_minor: 150_000,
                currency: "KZT".into(),
                remaining_quantity: remaining,
                max_per_order: 10,
                sales_start: now - Duration::hours(1),
                sales_end: now + Duration::hours(1),
            })
            .unwrap();
    }

    fn seed_order(store: &MemoryStore, seat: Option<i64>) -> (Order, Vec<Ticket>) {
        let new_order = NewOrder {
            user_id: 7,
            event_id: 1,
            line_items: vec![],
            total_amount_minor: 150_000,
            currency: "KZT".into(),
            attendee_name: "Аружан С.".into(),
            attendee_email: "aruzhan@example.kz".into(),
            attendee_phone: None,
        };
        let ticket = NewTicket {
            event_id: 1,
            ticket_type_id: 10,
            seat_id: seat,
            table_id: None,
            ticket_code: crate::models::new_ticket_code(),
        };
        store.insert_order(new_order, vec![ticket]).unwrap()
    }

    #[test]
    fn decrement_never_goes_negative() {
        let store = MemoryStore::new();
        seed_type(&store, 10, 3);

        assert!(store.decrement_remaining(10, 2).unwrap());
        assert!(!store.decrement_remaining(10, 2).unwrap());
        assert!(store.decrement_remaining(10, 1).unwrap());

        let tt = store.ticket_type(10).unwrap().unwrap();
        assert_eq!(tt.remaining_quantity, 0);
    }

    #[test]
    fn transition_order_is_single_winner() {
        let store = MemoryStore::new();
        seed_type(&store, 10, 5);
        let (order, _) = seed_order(&store, None);

        assert!(store
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Paid)
            .unwrap());
        assert!(!store
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .unwrap());
        assert_eq!(
            store.order(order.id).unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[test]
    fn live_seat_cannot_be_attached_twice() {
        let store = MemoryStore::new();
        seed_type(&store, 10, 5);
        seed_order(&store, Some(42));

        let second = store.insert_order(
            NewOrder {
                user_id: 8,
                event_id: 1,
                line_items: vec![],
                total_amount_minor: 150_000,
                currency: "KZT".into(),
                attendee_name: "Данияр Т.".into(),
                attendee_email: "daniyar@example.kz".into(),
                attendee_phone: None,
            },
            vec![NewTicket {
                event_id: 1,
                ticket_type_id: 10,
                seat_id: Some(42),
                table_id: None,
                ticket_code: crate::models::new_ticket_code(),
            }],
        );
        assert!(matches!(
            second,
            Err(StoreError::ResourceConflict {
                resource_id: Some(42)
            })
        ));
    }

    #[test]
    fn check_in_requires_issued() {
        let store = MemoryStore::new();
        seed_type(&store, 10, 5);
        let (_, tickets) = seed_order(&store, None);
        let id = tickets[0].id;

        assert!(!store.check_in_ticket(id, 900, Utc::now()).unwrap());
        assert!(store.issue_ticket(id).unwrap());
        assert!(store.check_in_ticket(id, 900, Utc::now()).unwrap());
        assert!(!store.check_in_ticket(id, 901, Utc::now()).unwrap());

        let t = store.ticket(id).unwrap().unwrap();
        assert_eq!(t.status, TicketStatus::CheckedIn);
        assert_eq!(t.checked_in_by, Some(900));
        assert!(t.checked_in_at.is_some());
    }

    #[test]
    fn stats_count_issued_and_checked_in_only() {
        let store = MemoryStore::new();
        seed_type(&store, 10, 5);
        let (order, tickets) = seed_order(&store, None);
        let (_, more) = seed_order(&store, None);

        store.issue_order_tickets(order.id).unwrap();
        store.check_in_ticket(tickets[0].id, 900, Utc::now()).unwrap();
        // второй заказ остаётся pending и в статистику не попадает
        assert_eq!(more[0].status, TicketStatus::Pending);

        assert_eq!(store.event_ticket_stats(1).unwrap(), (1, 1));
    }
}
