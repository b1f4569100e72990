//! Order Lifecycle: pending → paid | cancelled.
//!
//! Создание заказа идёт строго по шагам: списание остатков, проверка
//! холдов и занятости ресурсов, атомарная вставка заказа с билетами.
//! Любой отказ после списания компенсируется возвратом остатков, поэтому
//! брошенных списаний не остаётся.
//!
//! Подтверждение и отмена сходятся в одном условном переходе статуса:
//! кто выиграл CAS pending→paid (или pending→cancelled), тот один раз
//! выполняет последствия. Проигравший получает AlreadyProcessed.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::models::{LineItem, NewOrder, NewTicket, Order, OrderStatus, Ticket, TicketCategory, TicketType};
use crate::services::inventory::InventoryLedger;
use crate::services::notify::{Notification, Notifier};
use crate::services::payment::{PaymentDecision, PaymentInitData, PaymentVerifier};
use crate::services::reservations::ReservationStore;
use crate::services::tickets::TicketLifecycle;
use crate::store::RecordStore;
use crate::AppState;

/// Входные данные создания заказа, уже прошедшие валидацию формы запроса.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: i64,
    pub event_id: i64,
    pub line_items: Vec<LineItem>,
    pub attendee_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
}

#[derive(Clone)]
pub struct OrderLifecycle {
    store: RecordStore,
    reservations: ReservationStore,
    ledger: InventoryLedger,
    tickets: TicketLifecycle,
    verifier: PaymentVerifier,
    notifier: Notifier,
    hold_ttl: Duration,
    max_payment_attempts: i32,
}

impl OrderLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: RecordStore,
        reservations: ReservationStore,
        verifier: PaymentVerifier,
        notifier: Notifier,
        hold_ttl: Duration,
        max_payment_attempts: i32,
    ) -> Self {
        OrderLifecycle {
            ledger: InventoryLedger::new(store.clone()),
            tickets: TicketLifecycle::new(store.clone()),
            store,
            reservations,
            verifier,
            notifier,
            hold_ttl,
            max_payment_attempts,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        OrderLifecycle::new(
            state.store.clone(),
            state.reservations.clone(),
            state.verifier.clone(),
            state.notifier.clone(),
            state.config.reservations.hold_ttl(),
            state.config.payment.max_attempts,
        )
    }

    /// Создание заказа. Возвращает pending-заказ, его билеты и данные
    /// инициации оплаты.
    pub async fn create_order(
        &self,
        req: CreateOrder,
    ) -> Result<(Order, Vec<Ticket>, PaymentInitData), ApiError> {
        validate_shape(&req)?;

        // Шаг 1: атомарные списания остатков; при любом отказе дальше
        // по шагам уже списанное возвращается.
        let mut decremented: Vec<(i64, i64)> = Vec::with_capacity(req.line_items.len());
        let mut types: Vec<TicketType> = Vec::with_capacity(req.line_items.len());
        for item in &req.line_items {
            match self.ledger.check_and_reserve(item.ticket_type_id, item.quantity).await {
                Ok(tt) => {
                    decremented.push((tt.id, item.quantity));
                    types.push(tt);
                }
                Err(e) => {
                    self.rollback_decrements(&decremented).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.validate_items(&req, &types).await {
            self.rollback_decrements(&decremented).await;
            return Err(e);
        }

        // Шаг 3: заказ и билеты одной атомарной вставкой. Частичные
        // уникальные индексы добивают гонку двух заказов на один ресурс.
        let total_amount_minor: i64 = req
            .line_items
            .iter()
            .zip(&types)
            .map(|(item, tt)| tt.price_minor * item.quantity)
            .sum();
        let currency = types[0].currency.clone();
        let new_tickets = build_tickets(&req, &types);

        let new_order = NewOrder {
            user_id: req.user_id,
            event_id: req.event_id,
            line_items: req.line_items.clone(),
            total_amount_minor,
            currency,
            attendee_name: req.attendee_name.clone(),
            attendee_email: req.attendee_email.clone(),
            attendee_phone: req.attendee_phone.clone(),
        };

        let (order, tickets) = match self.store.insert_order(new_order, new_tickets).await {
            Ok(inserted) => inserted,
            Err(e) => {
                self.rollback_decrements(&decremented).await;
                return Err(e.into());
            }
        };

        // Холды продлеваются на полный TTL: у покупателя целое окно на
        // оплату, а свип отменит заказ по тому же таймауту.
        for resource_id in order.resource_ids() {
            self.reservations
                .reserve(order.event_id, resource_id, order.user_id, self.hold_ttl)
                .await;
        }

        let payment = self.verifier.init_data(&order);
        info!(
            "🧾 order {} created for user {}: {} tickets, {} {}",
            order.id,
            order.user_id,
            tickets.len(),
            order.total_amount_minor,
            order.currency
        );
        Ok((order, tickets, payment))
    }

    /// Подтверждение оплаты. Идемпотентность обеспечивает CAS
    /// pending→paid: только победитель выпускает билеты.
    pub async fn confirm_order(
        &self,
        order_id: i64,
        provider_ref: &str,
        provider_signature: &str,
    ) -> Result<Order, ApiError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(ApiError::OrderNotFound)?;
        if order.status != OrderStatus::Pending {
            return Err(ApiError::AlreadyProcessed);
        }

        // Недоступный верификатор не трогает заказ: ошибка уходит
        // клиенту, повторить можно позже.
        let decision = self
            .verifier
            .verify(&order, provider_ref, provider_signature)
            .await?;

        match decision {
            PaymentDecision::Rejected { reason } => {
                let attempts = self.store.bump_payment_attempts(order_id).await?;
                warn!(
                    "payment rejected for order {order_id} (attempt {attempts}/{}): {reason}",
                    self.max_payment_attempts
                );
                if attempts >= self.max_payment_attempts {
                    match self
                        .cancel_order(order_id, "payment verification attempts exhausted")
                        .await
                    {
                        Ok(_) => {}
                        // параллельный confirm успел подтвердить заказ
                        Err(ApiError::AlreadyProcessed) => {}
                        Err(e) => {
                            error!("failed to cancel order {order_id} after exhausted attempts: {e}")
                        }
                    }
                }
                Err(ApiError::PaymentVerificationFailed)
            }
            PaymentDecision::Confirmed => {
                if !self
                    .store
                    .transition_order(order_id, OrderStatus::Pending, OrderStatus::Paid)
                    .await?
                {
                    return Err(ApiError::AlreadyProcessed);
                }

                let issued = self.tickets.issue_order(order_id).await?;
                self.reservations
                    .release_many(order.event_id, &order.resource_ids())
                    .await;
                self.notifier.notify(Notification::OrderConfirmed {
                    order_id,
                    user_id: order.user_id,
                    event_id: order.event_id,
                    ticket_count: issued as usize,
                    attendee_email: order.attendee_email.clone(),
                });
                info!("✅ order {order_id} confirmed, {issued} tickets issued");

                self.refreshed(order_id).await
            }
        }
    }

    /// Отмена pending-заказа с компенсациями: билеты отменяются, остатки
    /// возвращаются, холды снимаются.
    pub async fn cancel_order(&self, order_id: i64, reason: &str) -> Result<Order, ApiError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(ApiError::OrderNotFound)?;
        if !self
            .store
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await?
        {
            return Err(ApiError::AlreadyProcessed);
        }

        let cancelled = self.tickets.cancel_order(order_id).await?;
        for item in &order.line_items {
            if let Err(e) = self.ledger.restore(item.ticket_type_id, item.quantity).await {
                error!("inventory restore failed for order {order_id}: {e}");
            }
        }
        self.reservations
            .release_many(order.event_id, &order.resource_ids())
            .await;
        self.notifier.notify(Notification::OrderCancelled {
            order_id,
            user_id: order.user_id,
            event_id: order.event_id,
            reason: reason.to_string(),
        });
        info!("🚫 order {order_id} cancelled ({reason}), {cancelled} tickets cancelled");

        self.refreshed(order_id).await
    }

    // Шаг 2: каждый конкретный ресурс должен быть под живым холдом
    // заказчика и не занят чужим неотменённым билетом.
    async fn validate_items(&self, req: &CreateOrder, types: &[TicketType]) -> Result<(), ApiError> {
        let currency = &types[0].currency;
        for tt in types {
            if tt.currency != *currency {
                return Err(ApiError::CurrencyMismatch);
            }
        }

        for (item, tt) in req.line_items.iter().zip(types) {
            validate_item_shape(item, tt, req.event_id)?;
            if !tt.category.needs_resources() {
                continue;
            }

            for resource_id in item.resource_ids() {
                if !self
                    .reservations
                    .is_held_by(req.event_id, resource_id, req.user_id)
                    .await
                {
                    return if self
                        .reservations
                        .is_reserved(req.event_id, resource_id, Some(req.user_id))
                        .await
                    {
                        Err(ApiError::ReservationConflict { resource_id })
                    } else {
                        Err(ApiError::ReservationExpired { resource_id })
                    };
                }

                if self
                    .store
                    .resource_bound(req.event_id, tt.category, resource_id)
                    .await?
                {
                    return Err(ApiError::SeatTaken {
                        resource_id: Some(resource_id),
                    });
                }
            }
        }
        Ok(())
    }

    async fn rollback_decrements(&self, decremented: &[(i64, i64)]) {
        for (ticket_type_id, qty) in decremented {
            if let Err(e) = self.ledger.restore(*ticket_type_id, *qty).await {
                error!("rollback failed for ticket type {ticket_type_id}: {e}");
            }
        }
    }

    async fn refreshed(&self, order_id: i64) -> Result<Order, ApiError> {
        self.store
            .order(order_id)
            .await?
            .ok_or(ApiError::OrderNotFound)
    }
}

fn validate_shape(req: &CreateOrder) -> Result<(), ApiError> {
    if req.line_items.is_empty() {
        return Err(ApiError::Validation(
            "order must contain at least one line item".into(),
        ));
    }

    let mut seats = HashSet::new();
    let mut tables = HashSet::new();
    for item in &req.line_items {
        if item.quantity < 1 {
            return Err(ApiError::Validation(format!(
                "quantity for ticket type {} must be at least 1",
                item.ticket_type_id
            )));
        }
        for seat in &item.seat_ids {
            if !seats.insert(*seat) {
                return Err(ApiError::Validation(format!(
                    "seat {seat} appears more than once in the order"
                )));
            }
        }
        for table in &item.table_ids {
            if !tables.insert(*table) {
                return Err(ApiError::Validation(format!(
                    "table {table} appears more than once in the order"
                )));
            }
        }
    }
    Ok(())
}

fn validate_item_shape(item: &LineItem, tt: &TicketType, event_id: i64) -> Result<(), ApiError> {
    if tt.event_id != event_id {
        return Err(ApiError::Validation(format!(
            "ticket type {} belongs to a different event",
            tt.id
        )));
    }
    match tt.category {
        TicketCategory::Ga => {
            if !item.seat_ids.is_empty() || !item.table_ids.is_empty() {
                return Err(ApiError::Validation(format!(
                    "GA ticket type {} does not take seat or table ids",
                    tt.id
                )));
            }
        }
        TicketCategory::Seated => {
            if !item.table_ids.is_empty() {
                return Err(ApiError::Validation(format!(
                    "seated ticket type {} does not take table ids",
                    tt.id
                )));
            }
            if item.seat_ids.len() as i64 != item.quantity {
                return Err(ApiError::Validation(format!(
                    "ticket type {}: {} seat ids for quantity {}",
                    tt.id,
                    item.seat_ids.len(),
                    item.quantity
                )));
            }
        }
        TicketCategory::Table => {
            if !item.seat_ids.is_empty() {
                return Err(ApiError::Validation(format!(
                    "table ticket type {} does not take seat ids",
                    tt.id
                )));
            }
            if item.table_ids.len() as i64 != item.quantity {
                return Err(ApiError::Validation(format!(
                    "ticket type {}: {} table ids for quantity {}",
                    tt.id,
                    item.table_ids.len(),
                    item.quantity
                )));
            }
        }
    }
    Ok(())
}

/// Один билет на каждую купленную единицу; для SEATED/TABLE ресурсы
/// раскладываются по билетам в порядке перечисления.
fn build_tickets(req: &CreateOrder, types: &[TicketType]) -> Vec<NewTicket> {
    let mut tickets = Vec::new();
    for (item, tt) in req.line_items.iter().zip(types) {
        match tt.category {
            TicketCategory::Ga => {
                for _ in 0..item.quantity {
                    tickets.push(NewTicket {
                        event_id: req.event_id,
                        ticket_type_id: tt.id,
                        seat_id: None,
                        table_id: None,
                        ticket_code: crate::models::new_ticket_code(),
                    });
                }
            }
            TicketCategory::Seated => {
                for seat in &item.seat_ids {
                    tickets.push(NewTicket {
                        event_id: req.event_id,
                        ticket_type_id: tt.id,
                        seat_id: Some(*seat),
                        table_id: None,
                        ticket_code: crate::models::new_ticket_code(),
                    });
                }
            }
            TicketCategory::Table => {
                for table in &item.table_ids {
                    tickets.push(NewTicket {
                        event_id: req.event_id,
                        ticket_type_id: tt.id,
                        seat_id: None,
                        table_id: Some(*table),
                        ticket_code: crate::models::new_ticket_code(),
                    });
                }
            }
        }
    }
    tickets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::TicketStatus;
    use crate::services::payment::expected_signature;
    use chrono::Utc;
    use tokio::sync::mpsc::Receiver;

    const EVENT: i64 = 1;
    const GA_TYPE: i64 = 10;
    const SEATED_TYPE: i64 = 20;

    struct Harness {
        lifecycle: OrderLifecycle,
        store: RecordStore,
        reservations: ReservationStore,
        config: Config,
        #[allow(dead_code)]
        inbox: Receiver<Notification>,
    }

    fn harness() -> Harness {
        let config = Config::default();
        let store = RecordStore::memory();
        let reservations = ReservationStore::memory();
        let verifier =
            PaymentVerifier::from_config(&config.payment, &config.circuit_breaker);
        let (notifier, inbox) = Notifier::channel(64);

        let now = Utc::now();
        let window = (now - chrono::Duration::hours(1), now + chrono::Duration::hours(1));
        for tt in [
            TicketType {
                id: GA_TYPE,
                event_id: EVENT,
                name: "Танцпол".into(),
                category: TicketCategory::Ga,
                price_minor: 500_000,
                currency: "KZT".into(),
                remaining_quantity: 10,
                max_per_order: 4,
                sales_start: window.0,
                sales_end: window.1,
            },
            TicketType {
                id: SEATED_TYPE,
                event_id: EVENT,
                name: "Партер".into(),
                category: TicketCategory::Seated,
                price_minor: 1_000_000,
                currency: "KZT".into(),
                remaining_quantity: 50,
                max_per_order: 6,
                sales_start: window.0,
                sales_end: window.1,
            },
        ] {
            let RecordStore::Memory(mem) = &store else { unreachable!() };
            mem.insert_ticket_type(tt).unwrap();
        }

        let lifecycle = OrderLifecycle::new(
            store.clone(),
            reservations.clone(),
            verifier,
            notifier,
            config.reservations.hold_ttl(),
            config.payment.max_attempts,
        );
        Harness { lifecycle, store, reservations, config, inbox }
    }

    fn ga_request(user_id: i64, quantity: i64) -> CreateOrder {
        CreateOrder {
            user_id,
            event_id: EVENT,
            line_items: vec![LineItem {
                ticket_type_id: GA_TYPE,
                quantity,
                seat_ids: vec![],
                table_ids: vec![],
            }],
            attendee_name: "Гость".into(),
            attendee_email: "guest@example.kz".into(),
            attendee_phone: None,
        }
    }

    fn seated_request(user_id: i64, seats: Vec<i64>) -> CreateOrder {
        CreateOrder {
            user_id,
            event_id: EVENT,
            line_items: vec![LineItem {
                ticket_type_id: SEATED_TYPE,
                quantity: seats.len() as i64,
                seat_ids: seats,
                table_ids: vec![],
            }],
            attendee_name: "Гость".into(),
            attendee_email: "guest@example.kz".into(),
            attendee_phone: None,
        }
    }

    async fn remaining(store: &RecordStore, type_id: i64) -> i64 {
        store.ticket_type(type_id).await.unwrap().unwrap().remaining_quantity
    }

    #[tokio::test]
    async fn ga_order_decrements_inventory_and_stays_pending() {
        let h = harness();
        let (order, tickets, payment) =
            h.lifecycle.create_order(ga_request(7, 3)).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount_minor, 1_500_000);
        assert_eq!(tickets.len(), 3);
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Pending));
        assert_eq!(payment.provider, "mock");
        assert_eq!(remaining(&h.store, GA_TYPE).await, 7);
    }

    #[tokio::test]
    async fn seated_order_requires_live_own_hold() {
        let h = harness();

        // без холда
        let err = h.lifecycle.create_order(seated_request(7, vec![101])).await;
        assert!(matches!(err, Err(ApiError::ReservationExpired { resource_id: 101 })));
        assert_eq!(remaining(&h.store, SEATED_TYPE).await, 50);

        // чужой холд
        assert!(h.reservations.reserve(EVENT, 101, 8, h.config.reservations.hold_ttl()).await);
        let err = h.lifecycle.create_order(seated_request(7, vec![101])).await;
        assert!(matches!(err, Err(ApiError::ReservationConflict { resource_id: 101 })));
        assert_eq!(remaining(&h.store, SEATED_TYPE).await, 50);

        // свой холд
        assert!(h.reservations.reserve(EVENT, 102, 7, h.config.reservations.hold_ttl()).await);
        let (order, tickets, _) =
            h.lifecycle.create_order(seated_request(7, vec![102])).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(tickets[0].seat_id, Some(102));
        assert_eq!(remaining(&h.store, SEATED_TYPE).await, 49);
    }

    #[tokio::test]
    async fn confirm_issues_tickets_and_releases_holds() {
        let h = harness();
        let ttl = h.config.reservations.hold_ttl();
        assert!(h.reservations.reserve(EVENT, 101, 7, ttl).await);

        let (order, _, payment) =
            h.lifecycle.create_order(seated_request(7, vec![101])).await.unwrap();
        let signature = expected_signature(&order, &h.config.payment);

        let confirmed = h
            .lifecycle
            .confirm_order(order.id, &payment.provider_ref, &signature)
            .await
            .unwrap();
        assert_eq!(confirmed.status, OrderStatus::Paid);

        let tickets = h.store.order_tickets(order.id).await.unwrap();
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Issued));
        assert!(!h.reservations.is_reserved(EVENT, 101, None).await);

        // повторный confirm отвергается, билеты не перевыпускаются
        let second = h
            .lifecycle
            .confirm_order(order.id, &payment.provider_ref, &signature)
            .await;
        assert!(matches!(second, Err(ApiError::AlreadyProcessed)));
    }

    #[tokio::test]
    async fn rejected_payment_bumps_attempts_then_auto_cancels() {
        let h = harness();
        let (order, _, payment) = h.lifecycle.create_order(ga_request(7, 2)).await.unwrap();
        assert_eq!(remaining(&h.store, GA_TYPE).await, 8);

        for attempt in 1..=h.config.payment.max_attempts {
            let result = h
                .lifecycle
                .confirm_order(order.id, &payment.provider_ref, "bad-signature")
                .await;
            assert!(matches!(result, Err(ApiError::PaymentVerificationFailed)), "attempt {attempt}");
        }

        // после исчерпания попыток заказ отменён и склад возвращён
        let current = h.store.order(order.id).await.unwrap().unwrap();
        assert_eq!(current.status, OrderStatus::Cancelled);
        assert_eq!(current.payment_attempts, h.config.payment.max_attempts);
        assert_eq!(remaining(&h.store, GA_TYPE).await, 10);

        let tickets = h.store.order_tickets(order.id).await.unwrap();
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
    }

    #[tokio::test]
    async fn cancel_restores_inventory_and_is_single_shot() {
        let h = harness();
        let (order, _, _) = h.lifecycle.create_order(ga_request(7, 3)).await.unwrap();
        assert_eq!(remaining(&h.store, GA_TYPE).await, 7);

        let cancelled = h.lifecycle.cancel_order(order.id, "customer request").await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(remaining(&h.store, GA_TYPE).await, 10);

        let again = h.lifecycle.cancel_order(order.id, "customer request").await;
        assert!(matches!(again, Err(ApiError::AlreadyProcessed)));
        // повторная отмена не возвращает остаток второй раз
        assert_eq!(remaining(&h.store, GA_TYPE).await, 10);
    }

    #[tokio::test]
    async fn sold_seat_stays_sold_even_with_fresh_hold() {
        let h = harness();
        let ttl = h.config.reservations.hold_ttl();

        assert!(h.reservations.reserve(EVENT, 101, 7, ttl).await);
        let (order, _, payment) =
            h.lifecycle.create_order(seated_request(7, vec![101])).await.unwrap();
        let signature = expected_signature(&order, &h.config.payment);
        h.lifecycle
            .confirm_order(order.id, &payment.provider_ref, &signature)
            .await
            .unwrap();

        // холд освобождён после оплаты, другой пользователь может его взять
        assert!(h.reservations.reserve(EVENT, 101, 8, ttl).await);
        let err = h.lifecycle.create_order(seated_request(8, vec![101])).await;
        assert!(matches!(err, Err(ApiError::SeatTaken { resource_id: Some(101) })));
        assert_eq!(remaining(&h.store, SEATED_TYPE).await, 49);
    }

    #[tokio::test]
    async fn shape_violations_leave_inventory_untouched() {
        let h = harness();

        let mut bad = ga_request(7, 2);
        bad.line_items[0].seat_ids = vec![101];
        assert!(matches!(
            h.lifecycle.create_order(bad).await,
            Err(ApiError::Validation(_))
        ));

        let empty = CreateOrder { line_items: vec![], ..ga_request(7, 1) };
        assert!(matches!(
            h.lifecycle.create_order(empty).await,
            Err(ApiError::Validation(_))
        ));

        let dup = seated_request(7, vec![101, 101]);
        assert!(matches!(
            h.lifecycle.create_order(dup).await,
            Err(ApiError::Validation(_))
        ));

        assert_eq!(remaining(&h.store, GA_TYPE).await, 10);
        assert_eq!(remaining(&h.store, SEATED_TYPE).await, 50);
    }

    #[tokio::test]
    async fn mismatched_seat_count_is_rejected_and_rolled_back() {
        let h = harness();
        let ttl = h.config.reservations.hold_ttl();
        assert!(h.reservations.reserve(EVENT, 101, 7, ttl).await);

        let mut req = seated_request(7, vec![101]);
        req.line_items[0].quantity = 2;
        assert!(matches!(
            h.lifecycle.create_order(req).await,
            Err(ApiError::Validation(_))
        ));
        assert_eq!(remaining(&h.store, SEATED_TYPE).await, 50);
    }
}
