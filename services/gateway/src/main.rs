mod config;
mod error;
mod handlers;
mod models;
mod router;
mod state;

use config::GatewayConfig;
use feed::{FeedEngine, MemoryStore};
use router::create_router;
use state::AppState;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Gateway service");

    let config = GatewayConfig::from_env();

    // In-process store; records arrive through PUT /v1/records/{address}
    let store = Arc::new(MemoryStore::new());
    let (engine, feed_task) = FeedEngine::start(store.clone(), config.feed.clone()).await?;

    let state = AppState::new(Arc::new(engine), store, config.max_interest_keys);
    let app = create_router(state);

    let listener = TcpListener::bind(config.addr).await?;
    tracing::info!("Listening on {}", config.addr);

    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        ingestion = feed_task.wait() => {
            // Restart policy belongs to the process supervisor.
            ingestion?;
            tracing::warn!("Feed ingestion stopped");
        }
    }

    Ok(())
}
