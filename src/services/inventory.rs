//! Inventory Ledger: счётчики остатков по типам билетов.
//!
//! Списание — один атомарный check-and-decrement в Record Store, поэтому
//! остаток не уходит в минус ни при какой конкуренции. Оверсейл здесь
//! исключается конструктивно, а не проверкой после факта.

use tracing::{debug, info};

use crate::error::ApiError;
use crate::models::TicketType;
use crate::store::RecordStore;

#[derive(Clone)]
pub struct InventoryLedger {
    store: RecordStore,
}

impl InventoryLedger {
    pub fn new(store: RecordStore) -> Self {
        InventoryLedger { store }
    }

    /// Проверяет окно продаж и лимит на заказ, затем атомарно списывает
    /// `quantity` единиц. Возвращает снимок типа билета (цена, валюта,
    /// категория) для дальнейшей сборки заказа.
    pub async fn check_and_reserve(
        &self,
        ticket_type_id: i64,
        quantity: i64,
    ) -> Result<TicketType, ApiError> {
        if quantity < 1 {
            return Err(ApiError::Validation(format!(
                "quantity for ticket type {ticket_type_id} must be at least 1"
            )));
        }

        let tt = self
            .store
            .ticket_type(ticket_type_id)
            .await?
            .ok_or(ApiError::TicketTypeNotFound { ticket_type_id })?;

        if !tt.sales_open_at(chrono::Utc::now()) {
            return Err(ApiError::SalesWindowClosed { ticket_type_id });
        }
        if quantity > tt.max_per_order {
            return Err(ApiError::OrderLimitExceeded { max: tt.max_per_order });
        }

        if !self.store.decrement_remaining(ticket_type_id, quantity).await? {
            return Err(ApiError::InsufficientInventory { ticket_type_id });
        }

        debug!("reserved {quantity} of ticket type {ticket_type_id}");
        Ok(tt)
    }

    /// Возврат остатка при отмене или откате заказа.
    pub async fn restore(&self, ticket_type_id: i64, quantity: i64) -> Result<(), ApiError> {
        self.store.restore_remaining(ticket_type_id, quantity).await?;
        info!("restored {quantity} of ticket type {ticket_type_id}");
        Ok(())
    }
}
