mod common;

use common::*;
use futures::future::join_all;
use kassa::error::ApiError;
use kassa::models::{TicketCategory, TicketStatus};
use kassa::services::checkin::CheckInService;
use kassa::services::orders::OrderLifecycle;
use kassa::services::payment::expected_signature;

#[tokio::test]
async fn oversubscribed_inventory_sells_exactly_the_capacity() {
    let state = test_state().await;
    // Ужимаем остаток танцпола до 5, чтобы спрос превысил предложение.
    assert!(state.store.decrement_remaining(GA_TYPE, 95).await.unwrap());

    let lifecycle = OrderLifecycle::from_state(&state);
    let attempts: Vec<_> = (0..20)
        .map(|i| {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.create_order(ga_order(100 + i, 1)).await })
        })
        .collect();

    let mut sold = 0;
    let mut rejected = 0;
    for outcome in join_all(attempts).await {
        match outcome.unwrap() {
            Ok(_) => sold += 1,
            Err(ApiError::InsufficientInventory { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(sold, 5);
    assert_eq!(rejected, 15);
    let ga = state.store.ticket_type(GA_TYPE).await.unwrap().unwrap();
    assert_eq!(ga.remaining_quantity, 0);
}

#[tokio::test]
async fn contested_seat_has_a_single_winner() {
    let state = test_state().await;
    let lifecycle = OrderLifecycle::from_state(&state);
    let ttl = state.config.reservations.hold_ttl();
    const SEAT: i64 = 777;

    let attempts: Vec<_> = (0..10)
        .map(|i| {
            let state = state.clone();
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                let holder = 500 + i;
                if !state.reservations.reserve(EVENT, SEAT, holder, ttl).await {
                    return Err(ApiError::ReservationConflict { resource_id: SEAT });
                }
                lifecycle.create_order(seated_order(holder, vec![SEAT])).await
            })
        })
        .collect();

    let winners = join_all(attempts)
        .await
        .into_iter()
        .filter(|outcome| outcome.as_ref().unwrap().is_ok())
        .count();

    assert_eq!(winners, 1);
    assert!(state
        .store
        .resource_bound(EVENT, TicketCategory::Seated, SEAT)
        .await
        .unwrap());

    // Проиграли ровно девять: остаток вернулся к исходным 50 минус одно место.
    let seated = state.store.ticket_type(SEATED_TYPE).await.unwrap().unwrap();
    assert_eq!(seated.remaining_quantity, 49);
}

#[tokio::test]
async fn concurrent_confirms_issue_tickets_once() {
    let state = test_state().await;
    let lifecycle = OrderLifecycle::from_state(&state);

    let (order, _, payment) = lifecycle.create_order(ga_order(7, 3)).await.unwrap();
    let signature = expected_signature(&order, &state.config.payment);

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let lifecycle = lifecycle.clone();
            let provider_ref = payment.provider_ref.clone();
            let signature = signature.clone();
            tokio::spawn(async move {
                lifecycle.confirm_order(order.id, &provider_ref, &signature).await
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut already = 0;
    for outcome in join_all(attempts).await {
        match outcome.unwrap() {
            Ok(_) => confirmed += 1,
            Err(ApiError::AlreadyProcessed) => already += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(already, 4);

    let tickets = state.store.order_tickets(order.id).await.unwrap();
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t.status == TicketStatus::Issued));
}

#[tokio::test]
async fn duplicate_scans_check_in_once() {
    let state = test_state().await;
    let lifecycle = OrderLifecycle::from_state(&state);

    let (order, _, payment) = lifecycle.create_order(ga_order(7, 1)).await.unwrap();
    let signature = expected_signature(&order, &state.config.payment);
    lifecycle
        .confirm_order(order.id, &payment.provider_ref, &signature)
        .await
        .unwrap();
    let code = state.store.order_tickets(order.id).await.unwrap()[0]
        .ticket_code
        .clone();

    let checkin = CheckInService::from_state(&state);
    let attempts: Vec<_> = (0..5)
        .map(|i| {
            let checkin = checkin.clone();
            let code = code.clone();
            tokio::spawn(async move { checkin.scan(&code, EVENT, 400 + i).await })
        })
        .collect();

    let mut passed = 0;
    let mut duplicates = 0;
    for outcome in join_all(attempts).await {
        match outcome.unwrap() {
            Ok(_) => passed += 1,
            Err(ApiError::AlreadyCheckedIn) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(passed, 1);
    assert_eq!(duplicates, 4);
}
