pub mod config;
pub mod controllers;
pub mod error;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::services::notify::Notifier;
use crate::services::payment::PaymentVerifier;
use crate::services::reservations::ReservationStore;
use crate::store::RecordStore;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub reservations: ReservationStore,
    pub verifier: PaymentVerifier,
    pub notifier: Notifier,
    pub config: Config,
}

impl AppState {
    /// Собирает состояние по конфигу: бэкенды хранилищ, верификатор
    /// оплаты, очередь уведомлений. Memory-бэкенды поднимаются без
    /// внешней инфраструктуры.
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        let store = match config.store.backend.as_str() {
            "postgres" => {
                let url = config
                    .store
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL must be set for the postgres store backend")?;
                let pg = store::PgStore::connect(url, config.store.pool_size).await?;
                pg.run_migrations().await?;
                info!("Postgres record store ready");
                RecordStore::Postgres(pg)
            }
            "memory" => RecordStore::memory(),
            other => anyhow::bail!("unknown store backend {other:?}"),
        };

        if let Some(path) = &config.store.fixtures {
            let seeded = load_fixtures(&store, path).await?;
            info!("Loaded {seeded} ticket types from {path}");
        }

        let reservations = match config.reservations.backend.as_str() {
            "redis" => {
                let url = config
                    .reservations
                    .redis_url
                    .as_deref()
                    .context("REDIS_URL must be set for the redis reservation backend")?;
                let client = redis_client::RedisClient::new(url).await?;
                info!("Redis reservation store ready");
                ReservationStore::redis(client)
            }
            "memory" => ReservationStore::memory(),
            other => anyhow::bail!("unknown reservation backend {other:?}"),
        };

        let verifier = PaymentVerifier::from_config(&config.payment, &config.circuit_breaker);
        let notifier = Notifier::spawn(config.notify.queue_capacity);

        Ok(Arc::new(Self {
            store,
            reservations,
            verifier,
            notifier,
            config,
        }))
    }
}

/// Полный HTTP-роутер приложения; интеграционные тесты поднимают его
/// напрямую, без сетевого сокета.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Kassa API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Каталог типов билетов из JSON-файла для memory-бэкенда.
async fn load_fixtures(store: &RecordStore, path: &str) -> anyhow::Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read fixtures {path}"))?;
    let catalog: Vec<models::TicketType> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse fixtures {path}"))?;

    let count = catalog.len();
    for tt in catalog {
        store.insert_ticket_type(tt).await?;
    }
    Ok(count)
}
