//! Postgres-бэкенд Record Store.
//!
//! Вся конкуренция решается на уровне SQL: условные UPDATE с фильтром по
//! текущему статусу (или остатку) и проверкой `rows_affected`, частичные
//! уникальные индексы на живые прикрепления мест и столов. Никаких
//! SELECT-then-UPDATE без условия.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;

use super::StoreError;
use crate::models::{
    LineItem, NewOrder, NewTicket, Order, OrderStatus, Ticket, TicketCategory, TicketStatus,
    TicketType,
};

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, category, price_minor, currency, \
     remaining_quantity, max_per_order, sales_start, sales_end";

const ORDER_COLUMNS: &str = "id, user_id, event_id, status, line_items, total_amount_minor, \
     currency, attendee_name, attendee_email, attendee_phone, payment_attempts, created_at";

const TICKET_COLUMNS: &str = "id, order_id, event_id, ticket_type_id, seat_id, table_id, \
     ticket_code, status, checked_in_at, checked_in_by";

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(PgStore { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("Migrations completed");
        Ok(())
    }

    pub async fn ticket_type(&self, id: i64) -> Result<Option<TicketType>, StoreError> {
        let row = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TicketType::try_from).transpose()
    }

    pub async fn insert_ticket_type(&self, tt: TicketType) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ticket_types \
             (id, event_id, name, category, price_minor, currency, remaining_quantity, \
              max_per_order, sales_start, sales_end) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(tt.id)
        .bind(tt.event_id)
        .bind(&tt.name)
        .bind(tt.category.as_str())
        .bind(tt.price_minor)
        .bind(&tt.currency)
        .bind(tt.remaining_quantity)
        .bind(tt.max_per_order)
        .bind(tt.sales_start)
        .bind(tt.sales_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn decrement_remaining(&self, id: i64, qty: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE ticket_types \
             SET remaining_quantity = remaining_quantity - $2 \
             WHERE id = $1 AND remaining_quantity >= $2",
        )
        .bind(id)
        .bind(qty)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn restore_remaining(&self, id: i64, qty: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE ticket_types SET remaining_quantity = remaining_quantity + $2 WHERE id = $1",
        )
        .bind(id)
        .bind(qty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_order(
        &self,
        order: NewOrder,
        tickets: Vec<NewTicket>,
    ) -> Result<(Order, Vec<Ticket>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders \
             (user_id, event_id, status, line_items, total_amount_minor, currency, \
              attendee_name, attendee_email, attendee_phone) \
             VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.user_id)
        .bind(order.event_id)
        .bind(Json(&order.line_items))
        .bind(order.total_amount_minor)
        .bind(&order.currency)
        .bind(&order.attendee_name)
        .bind(&order.attendee_email)
        .bind(&order.attendee_phone)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        let mut ticket_rows = Vec::with_capacity(tickets.len());
        for nt in &tickets {
            let row = sqlx::query_as::<_, TicketRow>(&format!(
                "INSERT INTO tickets \
                 (order_id, event_id, ticket_type_id, seat_id, table_id, ticket_code, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, 'pending') \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(order_row.id)
            .bind(nt.event_id)
            .bind(nt.ticket_type_id)
            .bind(nt.seat_id)
            .bind(nt.table_id)
            .bind(&nt.ticket_code)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_insert_error)?;
            ticket_rows.push(row);
        }

        tx.commit().await?;

        let order = Order::try_from(order_row)?;
        let tickets = ticket_rows
            .into_iter()
            .map(Ticket::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((order, tickets))
    }

    pub async fn order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    pub async fn transition_order(
        &self,
        id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn bump_payment_attempts(&self, id: i64) -> Result<i32, StoreError> {
        let attempts: i32 = sqlx::query_scalar(
            "UPDATE orders SET payment_attempts = payment_attempts + 1 \
             WHERE id = $1 RETURNING payment_attempts",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    pub async fn expired_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'pending' AND created_at <= $1 \
             ORDER BY created_at, id LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    pub async fn ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    pub async fn ticket_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    pub async fn order_tickets(&self, order_id: i64) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    pub async fn issue_ticket(&self, id: i64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE tickets SET status = 'issued' WHERE id = $1 AND status = 'pending'")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn check_in_ticket(
        &self,
        id: i64,
        staff_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets \
             SET status = 'checked_in', checked_in_at = $2, checked_in_by = $3 \
             WHERE id = $1 AND status = 'issued'",
        )
        .bind(id)
        .bind(at)
        .bind(staff_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn cancel_ticket(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'cancelled' \
             WHERE id = $1 AND status IN ('pending', 'issued')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn issue_order_tickets(&self, order_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'issued' WHERE order_id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn cancel_order_tickets(&self, order_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'cancelled' \
             WHERE order_id = $1 AND status IN ('pending', 'issued')",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn resource_bound(
        &self,
        event_id: i64,
        category: TicketCategory,
        resource_id: i64,
    ) -> Result<bool, StoreError> {
        let column = match category {
            TicketCategory::Seated => "seat_id",
            TicketCategory::Table => "table_id",
            TicketCategory::Ga => return Ok(false),
        };

        let bound: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS( \
                SELECT 1 FROM tickets \
                WHERE event_id = $1 AND {column} = $2 AND status <> 'cancelled')"
        ))
        .bind(event_id)
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(bound)
    }

    pub async fn event_ticket_stats(&self, event_id: i64) -> Result<(i64, i64), StoreError> {
        let (total, checked_in): (i64, i64) = sqlx::query_as(
            "SELECT \
                COUNT(*) FILTER (WHERE status IN ('issued', 'checked_in')), \
                COUNT(*) FILTER (WHERE status = 'checked_in') \
             FROM tickets WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((total, checked_in))
    }
}

/// Уникальный индекс (23505) на живое прикрепление ресурса — это проигрыш
/// гонки за место, а не внутренняя ошибка.
fn map_insert_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::ResourceConflict { resource_id: None }
        }
        _ => StoreError::Sqlx(e),
    }
}

#[derive(FromRow)]
struct TicketTypeRow {
    id: i64,
    event_id: i64,
    name: String,
    category: String,
    price_minor: i64,
    currency: String,
    remaining_quantity: i64,
    max_per_order: i64,
    sales_start: DateTime<Utc>,
    sales_end: DateTime<Utc>,
}

impl TryFrom<TicketTypeRow> for TicketType {
    type Error = StoreError;

    fn try_from(row: TicketTypeRow) -> Result<Self, StoreError> {
        let category = TicketCategory::parse(&row.category).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "ticket type {} has unknown category {:?}",
                row.id, row.category
            ))
        })?;
        Ok(TicketType {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            category,
            price_minor: row.price_minor,
            currency: row.currency,
            remaining_quantity: row.remaining_quantity,
            max_per_order: row.max_per_order,
            sales_start: row.sales_start,
            sales_end: row.sales_end,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    event_id: i64,
    status: String,
    line_items: Json<Vec<LineItem>>,
    total_amount_minor: i64,
    currency: String,
    attendee_name: String,
    attendee_email: String,
    attendee_phone: Option<String>,
    payment_attempts: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, StoreError> {
        let status = OrderStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "order {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            status,
            line_items: row.line_items.0,
            total_amount_minor: row.total_amount_minor,
            currency: row.currency,
            attendee_name: row.attendee_name,
            attendee_email: row.attendee_email,
            attendee_phone: row.attendee_phone,
            payment_attempts: row.payment_attempts,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: i64,
    order_id: i64,
    event_id: i64,
    ticket_type_id: i64,
    seat_id: Option<i64>,
    table_id: Option<i64>,
    ticket_code: String,
    status: String,
    checked_in_at: Option<DateTime<Utc>>,
    checked_in_by: Option<i64>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, StoreError> {
        let status = TicketStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "ticket {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        Ok(Ticket {
            id: row.id,
            order_id: row.order_id,
            event_id: row.event_id,
            ticket_type_id: row.ticket_type_id,
            seat_id: row.seat_id,
            table_id: row.table_id,
            ticket_code: row.ticket_code,
            status,
            checked_in_at: row.checked_in_at,
            checked_in_by: row.checked_in_by,
        })
    }
}
