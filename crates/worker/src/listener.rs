//! Change-feed listener.
//!
//! `LISTEN`s on the task and user channels, drops events another replica
//! already claimed, loads the recorded change and routes it:
//! - `tasks` → trigger processor
//! - `users` → token uniqueness check
//!
//! Events are handled one at a time. Nothing here fails the loop except
//! losing the database listener itself.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;

use taskpush_common::types::{Task, UserProfile};
use taskpush_engine::change::{ChangeEvent, ChangeLog, ChangeNotice};
use taskpush_engine::dedup::EventDeduplicator;
use taskpush_engine::processor::{TriggerOutcome, TriggerProcessor};
use taskpush_engine::store::Store;
use taskpush_engine::tokens;

pub const TASK_CHANNEL: &str = "task_changes";
pub const USER_CHANNEL: &str = "user_changes";

/// What a routed event resulted in.
#[derive(Debug)]
pub enum Routed {
    Task(Vec<TriggerOutcome>),
    TokensCleaned(usize),
    Ignored,
}

/// Sends decoded change events to the component that owns their table.
pub struct EventRouter {
    store: Arc<dyn Store>,
    processor: TriggerProcessor,
}

impl EventRouter {
    pub fn new(store: Arc<dyn Store>, processor: TriggerProcessor) -> Self {
        Self { store, processor }
    }

    pub async fn route(&self, event: &ChangeEvent) -> Routed {
        match event.table.as_str() {
            "tasks" => match event.decode::<Task>() {
                Ok(change) => Routed::Task(self.processor.handle_task_change(&change).await),
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Undecodable task change dropped"
                    );
                    Routed::Ignored
                }
            },
            "users" => match event.decode::<UserProfile>() {
                Ok(change) => match tokens::on_user_change(self.store.as_ref(), &change).await {
                    Ok(changed) => Routed::TokensCleaned(changed),
                    Err(e) => {
                        tracing::error!(
                            user_id = %event.id,
                            error = %e,
                            "Token uniqueness check failed"
                        );
                        Routed::TokensCleaned(0)
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Undecodable user change dropped"
                    );
                    Routed::Ignored
                }
            },
            other => {
                tracing::warn!(table = %other, "Change event for unknown table ignored");
                Routed::Ignored
            }
        }
    }
}

/// Postgres `LISTEN` loop with Redis-backed deduplication.
pub struct ChangeListener {
    pool: PgPool,
    redis: ConnectionManager,
    log: ChangeLog,
    dedup: EventDeduplicator,
    router: EventRouter,
}

impl ChangeListener {
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        dedup: EventDeduplicator,
        router: EventRouter,
    ) -> Self {
        Self {
            log: ChangeLog::new(pool.clone()),
            pool,
            redis,
            dedup,
            router,
        }
    }

    /// Run until `shutdown` is cancelled. The event in progress is finished
    /// before returning.
    pub async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen_all([TASK_CHANNEL, USER_CHANNEL]).await?;

        tracing::info!(
            channels = ?[TASK_CHANNEL, USER_CHANNEL],
            dedup_ttl_seconds = self.dedup.ttl_seconds(),
            "Change listener started"
        );

        // Changes older than the dedup window were announced while no worker
        // was listening and will never be delivered.
        let mut prune = tokio::time::interval(Duration::from_secs(self.dedup.ttl_seconds()));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = prune.tick() => self.prune().await,
                notification = listener.recv() => {
                    let notification = notification?;
                    self.handle(notification.channel(), notification.payload())
                        .await;
                }
            }
        }

        tracing::info!("Change listener stopped");
        Ok(())
    }

    async fn handle(&mut self, channel: &str, payload: &str) {
        let notice = match ChangeNotice::parse(payload) {
            Ok(notice) => notice,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Malformed change notice dropped");
                return;
            }
        };

        // Redis outage degrades to at-least-once delivery
        match self.dedup.first_seen(&mut self.redis, notice.event_id).await {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(
                    event_id = %notice.event_id,
                    error = %e,
                    "Deduplication unavailable, processing anyway"
                );
            }
        }

        let event = match self.log.fetch(notice.event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(event_id = %notice.event_id, "Change already consumed");
                return;
            }
            Err(e) => {
                tracing::error!(
                    event_id = %notice.event_id,
                    error = %e,
                    "Failed to load change event"
                );
                return;
            }
        };

        tracing::debug!(
            event_id = %event.event_id,
            table = %event.table,
            op = ?event.op,
            id = %event.id,
            "Change event received"
        );

        self.router.route(&event).await;

        if let Err(e) = self.log.remove(event.event_id).await {
            tracing::warn!(
                event_id = %event.event_id,
                error = %e,
                "Failed to remove consumed change"
            );
        }
    }

    async fn prune(&self) {
        match self.log.prune(self.dedup.ttl_seconds()).await {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "Pruned stale change events"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune change events"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use taskpush_common::types::{DeliveryToken, NotificationPayload, Role};
    use taskpush_engine::store::MemoryStore;
    use taskpush_notifier::{
        BatchResponse, Dispatcher, GatewayError, PushGateway, RetryPolicy, SendResponse,
    };

    use super::*;

    #[derive(Default)]
    struct CountingGateway {
        payloads: Mutex<Vec<NotificationPayload>>,
    }

    #[async_trait]
    impl PushGateway for CountingGateway {
        async fn send(
            &self,
            _token: &DeliveryToken,
            payload: &NotificationPayload,
        ) -> Result<String, GatewayError> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok("m/1".to_string())
        }

        async fn send_multicast(
            &self,
            tokens: &[DeliveryToken],
            payload: &NotificationPayload,
        ) -> Result<BatchResponse, GatewayError> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(BatchResponse {
                responses: tokens.iter().map(|_| SendResponse::delivered("m")).collect(),
            })
        }
    }

    fn user(uid: &str, name: &str, role: Role, tokens: &[&str]) -> UserProfile {
        UserProfile {
            uid: uid.to_string(),
            email: format!("{}@gmail.com", name.to_lowercase()),
            name: name.to_string(),
            role,
            username: name.to_lowercase(),
            has_password: true,
            created_at: chrono::Utc::now(),
            last_login: None,
            fcm_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fcm_token: None,
            fcm_tokens_updated_at: None,
        }
    }

    fn router(store: Arc<MemoryStore>, gateway: Arc<CountingGateway>) -> EventRouter {
        let dispatcher = Dispatcher::new(gateway)
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
        let processor = TriggerProcessor::new(store.clone(), dispatcher);
        EventRouter::new(store, processor)
    }

    fn task_doc(status: &str) -> serde_json::Value {
        json!({
            "id": "t1",
            "title": "Paint the fence",
            "status": status,
            "assigned_to": "u1",
            "created_by": "admin-1",
            "is_personal": false,
            "priority": "high",
            "review_comment": null,
            "created_at": "2025-03-01T10:00:00+00:00",
            "updated_at": "2025-03-01T10:00:00+00:00"
        })
    }

    fn event(
        table: &str,
        op: &str,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> ChangeEvent {
        serde_json::from_value(json!({
            "event_id": "5f0c6f8e-1d2b-4a55-9a7e-0b7c1f2d3e4a",
            "table": table,
            "op": op,
            "id": "t1",
            "before": before,
            "after": after
        }))
        .unwrap()
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_users(vec![
            user("admin-1", "Marta", Role::Admin, &["adm"]),
            user("u1", "Ana", Role::Normal, &["ana-phone"]),
            user("u2", "Pablo", Role::Normal, &["ana-phone", "pablo-phone"]),
        ]))
    }

    #[tokio::test]
    async fn test_task_insert_fires_assignment() {
        let gateway = Arc::new(CountingGateway::default());
        let router = router(store(), gateway.clone());

        let routed = router
            .route(&event("tasks", "INSERT", json!(null), task_doc("pending")))
            .await;

        assert!(matches!(routed, Routed::Task(ref outcomes) if outcomes.len() == 1));
        let payloads = gateway.payloads.lock().unwrap();
        assert_eq!(payloads[0].data["type"], "task_assigned");
        assert_eq!(payloads[0].data["priority"], "high");
    }

    #[tokio::test]
    async fn test_task_update_fires_review_submission() {
        let gateway = Arc::new(CountingGateway::default());
        let router = router(store(), gateway.clone());

        router
            .route(&event(
                "tasks",
                "UPDATE",
                task_doc("in_progress"),
                task_doc("pending_review"),
            ))
            .await;

        let payloads = gateway.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data["type"], "task_review_submitted");
    }

    #[tokio::test]
    async fn test_user_update_enforces_token_uniqueness() {
        let store = store();
        let gateway = Arc::new(CountingGateway::default());
        let router = router(store.clone(), gateway.clone());
        let ana = serde_json::to_value(store.get_user("u1").await.unwrap().unwrap()).unwrap();

        let routed = router
            .route(&event("users", "UPDATE", ana.clone(), ana))
            .await;

        assert!(matches!(routed, Routed::TokensCleaned(1)));
        let pablo = store.get_user("u2").await.unwrap().unwrap();
        assert_eq!(pablo.fcm_tokens, vec!["pablo-phone".to_string()]);
        assert!(gateway.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_incomplete_events_are_dropped() {
        let gateway = Arc::new(CountingGateway::default());
        let router = router(store(), gateway.clone());

        assert!(matches!(
            router
                .route(&event("projects", "INSERT", json!(null), json!({})))
                .await,
            Routed::Ignored
        ));
        // UPDATE without a before image
        assert!(matches!(
            router
                .route(&event("tasks", "UPDATE", json!(null), task_doc("rejected")))
                .await,
            Routed::Ignored
        ));
        assert!(gateway.payloads.lock().unwrap().is_empty());
    }
}
