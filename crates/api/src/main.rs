//! Lava Relay API Server
//!
//! Lava webhook → SaleBot Chatter callback proxy.

use std::net::SocketAddr;

use lavarelay_api::{create_router, AppState, Config};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lavarelay_api=debug,lavarelay_shared=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Lava Relay v{}", env!("CARGO_PKG_VERSION"));

    // A missing SALEBOT_API_KEY stops startup here
    let config = Config::from_env()?;
    tracing::info!(config = ?config, "Configuration loaded");

    let addr: SocketAddr = config.bind_address.parse()?;

    let state = AppState::new(config)?;

    tracing::info!("Running attribution store migrations...");
    state.store.migrate().await?;

    let app = create_router(state).layer(TraceLayer::new_for_http());

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down application");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
