//! Taskpush worker binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskpush_common::config::AppConfig;
use taskpush_common::db::{create_pool, run_migrations};
use taskpush_common::redis_pool::create_redis_pool;
use taskpush_engine::dedup::EventDeduplicator;
use taskpush_engine::processor::TriggerProcessor;
use taskpush_engine::store::PgStore;
use taskpush_notifier::fcm::FcmGateway;
use taskpush_notifier::{Dispatcher, RetryPolicy};
use taskpush_worker::listener::{ChangeListener, EventRouter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "taskpush_worker=info,taskpush_engine=info,taskpush_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Taskpush worker starting...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let redis = create_redis_pool(&config.redis_url).await?;

    let policy = RetryPolicy::new(
        config.push_max_attempts,
        Duration::from_millis(config.push_base_delay_ms),
    );
    tracing::info!(
        max_attempts = policy.max_attempts,
        base_delay_ms = config.push_base_delay_ms,
        worst_case_wait_ms = policy.worst_case_wait().as_millis() as u64,
        "Push retry policy"
    );

    let gateway = FcmGateway::new(
        config.fcm_endpoint.clone(),
        config.fcm_project_id.clone(),
        config.fcm_access_token.clone(),
    )
    .with_request_timeout(Duration::from_millis(config.push_request_timeout_ms));
    let dispatcher = Dispatcher::new(Arc::new(gateway)).with_retry_policy(policy);

    let shutdown = CancellationToken::new();
    let store = Arc::new(PgStore::new(pool.clone()));
    let processor =
        TriggerProcessor::new(store.clone(), dispatcher).with_shutdown(shutdown.clone());

    let mut listener = ChangeListener::new(
        pool,
        redis,
        EventDeduplicator::new(config.event_dedup_ttl_seconds),
        EventRouter::new(store, processor),
    );

    // Graceful shutdown on Ctrl+C: the event in progress is finished first
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                shutdown.cancel();
            }
        }
    });

    if let Err(e) = listener.run(shutdown).await {
        tracing::error!(error = %e, "Change listener exited with error");
        return Err(e);
    }

    tracing::info!("Taskpush worker stopped.");
    Ok(())
}
