//! Taskpush API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use taskpush_common::config::AppConfig;
use taskpush_common::db::{create_pool, run_migrations};
use taskpush_engine::identity::IdentityToolkitClient;
use taskpush_engine::store::PgStore;

use taskpush_api::routes::create_router;
use taskpush_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("taskpush_api=debug,taskpush_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Taskpush API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let identity = IdentityToolkitClient::new(
        config.identity_endpoint.clone(),
        config.fcm_project_id.clone(),
        config.fcm_access_token.clone(),
    )
    .with_request_timeout(Duration::from_millis(config.push_request_timeout_ms));

    let port = config.api_port;
    let state = AppState::new(Arc::new(PgStore::new(pool)), Arc::new(identity), config);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    Ok(())
}
