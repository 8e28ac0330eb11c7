//! PriceGuard server - market-alert and notification backend
//!
//! Wires the SQLite-backed repositories, the alert engine, the broadcast
//! hub, the notification service, and the monitor together, then serves the
//! WebSocket surface until Ctrl+C.
//!
//! # Usage
//! ```sh
//! PRICEGUARD_WS_TOKEN=secret cargo run --bin server
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use priceguard::application::broadcast::BroadcastHub;
use priceguard::application::engine::AlertEngine;
use priceguard::application::monitor::AlertMonitor;
use priceguard::application::notifications::NotificationService;
use priceguard::config::Config;
use priceguard::domain::repositories::{AlertRepository, NotificationRepository, UserRepository};
use priceguard::infrastructure::InMemoryMarketStore;
use priceguard::infrastructure::channels::adapter_registry;
use priceguard::infrastructure::persistence::{
    Database, SqliteAlertRepository, SqliteNotificationRepository, SqliteQueueStore,
    SqliteUserRepository,
};
use priceguard::interfaces::ws;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("PriceGuard Server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    anyhow::ensure!(
        !config.ws_auth_token.is_empty(),
        "PRICEGUARD_WS_TOKEN must be set"
    );

    // Persistence
    let database = Database::new(&config.database_url).await?;
    let alert_repo: Arc<dyn AlertRepository> =
        Arc::new(SqliteAlertRepository::new(database.pool.clone()));
    let notification_repo: Arc<dyn NotificationRepository> =
        Arc::new(SqliteNotificationRepository::new(database.pool.clone()));
    let user_repo: Arc<dyn UserRepository> =
        Arc::new(SqliteUserRepository::new(database.pool.clone()));
    let queue_store = Arc::new(SqliteQueueStore::new(database.pool.clone()));

    // Market snapshot store, fed by ingestion
    let market_store = Arc::new(InMemoryMarketStore::new());

    // Core services
    let hub = Arc::new(BroadcastHub::new());
    let adapters = adapter_registry(&config)?;
    let notifications = Arc::new(NotificationService::new(
        Arc::clone(&notification_repo),
        user_repo,
        queue_store,
        adapters,
        config.notification_config(),
    ));
    let engine = Arc::new(AlertEngine::new(
        Arc::clone(&alert_repo),
        Arc::clone(&notification_repo),
        market_store,
        config.engine_config(),
    ));
    engine.set_broadcast_hub(Some(Arc::clone(&hub))).await;

    let monitor = Arc::new(AlertMonitor::new(
        Arc::clone(&engine),
        Arc::clone(&notifications),
        alert_repo,
        notification_repo,
        config.monitor_config(),
    ));

    // Background workers
    let shutdown = CancellationToken::new();
    monitor.start(shutdown.clone()).await;
    notifications.start_processing(shutdown.clone()).await;

    // WebSocket surface
    let app = ws::router(Arc::clone(&hub), config.ws_auth_token.clone());
    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server_addr))?;
    info!("Listening on {}", config.server_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    info!("Server running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining workers...");

    shutdown.cancel();
    monitor.stop().await;
    notifications.stop_processing().await;
    server.abort();

    info!("Shutdown complete. Goodbye!");
    Ok(())
}
