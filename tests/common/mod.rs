#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;

use kassa::config::Config;
use kassa::models::{LineItem, TicketCategory, TicketType};
use kassa::services::orders::CreateOrder;
use kassa::AppState;

pub const EVENT: i64 = 1;
pub const OTHER_EVENT: i64 = 2;
pub const GA_TYPE: i64 = 10;
pub const SEATED_TYPE: i64 = 20;
pub const TABLE_TYPE: i64 = 30;

/// Каталог на два события: танцпол, партер, столики и чужой зал.
pub fn catalog() -> Vec<TicketType> {
    let now = Utc::now();
    let sales_start = now - Duration::hours(1);
    let sales_end = now + Duration::hours(24);
    let tt = |id, event_id, name: &str, category, price_minor, remaining, max_per_order| TicketType {
        id,
        event_id,
        name: name.to_string(),
        category,
        price_minor,
        currency: "KZT".to_string(),
        remaining_quantity: remaining,
        max_per_order,
        sales_start,
        sales_end,
    };

    vec![
        tt(GA_TYPE, EVENT, "Танцпол", TicketCategory::Ga, 500_000, 100, 10),
        tt(SEATED_TYPE, EVENT, "Партер", TicketCategory::Seated, 1_000_000, 50, 6),
        tt(TABLE_TYPE, EVENT, "Столик VIP", TicketCategory::Table, 5_000_000, 5, 2),
        tt(40, OTHER_EVENT, "Танцпол (другой зал)", TicketCategory::Ga, 300_000, 100, 10),
    ]
}

/// Состояние приложения на memory-бэкендах с засеянным каталогом.
pub async fn test_state() -> Arc<AppState> {
    let state = AppState::build(Config::default())
        .await
        .expect("memory state must build without infrastructure");
    for tt in catalog() {
        state.store.insert_ticket_type(tt).await.unwrap();
    }
    state
}

pub fn attendee() -> (String, String) {
    (Name().fake(), SafeEmail().fake())
}

pub fn ga_order(user_id: i64, quantity: i64) -> CreateOrder {
    let (name, email) = attendee();
    CreateOrder {
        user_id,
        event_id: EVENT,
        line_items: vec![LineItem {
            ticket_type_id: GA_TYPE,
            quantity,
            seat_ids: vec![],
            table_ids: vec![],
        }],
        attendee_name: name,
        attendee_email: email,
        attendee_phone: None,
    }
}

pub fn seated_order(user_id: i64, seat_ids: Vec<i64>) -> CreateOrder {
    let (name, email) = attendee();
    CreateOrder {
        user_id,
        event_id: EVENT,
        line_items: vec![LineItem {
            ticket_type_id: SEATED_TYPE,
            quantity: seat_ids.len() as i64,
            seat_ids,
            table_ids: vec![],
        }],
        attendee_name: name,
        attendee_email: email,
        attendee_phone: Some("+7 701 000 00 00".to_string()),
    }
}
