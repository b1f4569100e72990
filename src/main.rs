use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kassa::{app, config::Config, services::cleanup::CleanupService, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kassa API");

    let port = config.app.port;
    let sweep_interval = config.reservations.sweep_interval();

    // Create the shared application state
    let state = AppState::build(config).await?;

    // --- Start background tasks ---

    // Task to expire pending orders and drop stale seat holds
    let cleanup = CleanupService::new(Arc::clone(&state));
    task::spawn(async move {
        loop {
            cleanup.run_once().await;
            tokio::time::sleep(sweep_interval).await;
        }
    });

    // --- Start the web server ---

    let router = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}
