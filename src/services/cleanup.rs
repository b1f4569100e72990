//! Фоновая уборка: истёкшие pending-заказы и протухшие холды.
//!
//! Свип отменяет заказы, чьи холды заведомо истекли (created_at старше
//! TTL холда), через обычный Order Lifecycle: то же CAS-правило, те же
//! компенсации. Гонка с параллельным confirm безопасна - проигравшая
//! сторона получает AlreadyProcessed и не делает ничего.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::services::orders::OrderLifecycle;
use crate::AppState;

/// Сколько заказов отменяем одновременно внутри одного свипа.
const SWEEP_CONCURRENCY: usize = 4;

pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Один полный проход уборки; вызывается фоновым циклом по интервалу.
    pub async fn run_once(&self) {
        info!("🧹 Starting cleanup sweep");

        let ttl = chrono::Duration::seconds(
            self.state.config.reservations.hold_ttl_seconds as i64,
        );
        let cancelled = self.sweep_pending_orders(Utc::now() - ttl).await;
        let purged = self.state.reservations.sweep().await;

        info!(
            "✅ Cleanup sweep done: {cancelled} expired orders cancelled, {purged} stale holds purged"
        );
    }

    /// Отмена pending-заказов, созданных не позже `cutoff`. Возвращает
    /// число фактически отменённых.
    pub async fn sweep_pending_orders(&self, cutoff: DateTime<Utc>) -> usize {
        let batch = self.state.config.reservations.sweep_batch_size;
        let expired = self
            .state
            .store
            .expired_pending_orders(cutoff, batch)
            .await
            .unwrap_or_default();

        if expired.is_empty() {
            info!("⏳ No expired pending orders");
            return 0;
        }
        info!("⏳ Found {} expired pending orders", expired.len());

        let lifecycle = OrderLifecycle::from_state(&self.state);
        let results = stream::iter(expired.into_iter().map(|order| {
            let lifecycle = lifecycle.clone();
            async move {
                match lifecycle
                    .cancel_order(order.id, "reservation TTL expired")
                    .await
                {
                    Ok(_) => true,
                    Err(ApiError::AlreadyProcessed) => {
                        debug!("order {} finished while sweeping", order.id);
                        false
                    }
                    Err(e) => {
                        error!("sweep failed to cancel order {}: {e}", order.id);
                        false
                    }
                }
            }
        }))
        .buffer_unordered(SWEEP_CONCURRENCY)
        .collect::<Vec<bool>>()
        .await;

        results.into_iter().filter(|ok| *ok).count()
    }
}
