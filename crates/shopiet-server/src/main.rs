mod cleanup;
mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use shopiet_api::{AppState, AppStateInner};
use shopiet_chat::{MessageStore, QueryService, ResponseCache};
use shopiet_db::Database;
use shopiet_gateway::RoomRegistry;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopiet=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let cache = Arc::new(ResponseCache::new(config.cache_ttl));
    let store = Arc::new(MessageStore::new(db.clone(), db, cache.clone()));
    let app_state: AppState = Arc::new(AppStateInner {
        queries: QueryService::new(store.clone(), cache.clone()),
        store,
        registry: RoomRegistry::new(config.send_buffer),
        jwt_secret: config.jwt_secret.clone(),
    });

    let sweeper = tokio::spawn(cleanup::run_cache_sweeper(
        cache,
        config.cache_sweep_interval,
    ));

    let app = shopiet_api::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Shopiet chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
