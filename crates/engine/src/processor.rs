//! Task change processing pipeline.
//!
//! For each task change:
//! 1. Detect which triggers fire (via `TaskTrigger`)
//! 2. Resolve recipient profiles and their delivery tokens
//! 3. Build the payload and hand it to the `Dispatcher`
//! 4. Evict tokens the gateway reported as invalid from their owners
//!
//! Failures are logged and reported as outcomes; they never abort the
//! processing of the change event.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use taskpush_common::error::AppError;
use taskpush_common::types::{DeliveryToken, Task};
use taskpush_notifier::{DeliveryResult, Dispatcher};

use crate::change::DocumentChange;
use crate::store::Store;
use crate::triggers::{Actor, Audience, TaskTrigger};

/// Why a trigger produced no dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RecipientNotFound,
    NoTokens,
    LookupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Dispatched {
        trigger: TaskTrigger,
        result: DeliveryResult,
    },
    Skipped {
        trigger: TaskTrigger,
        reason: SkipReason,
    },
}

/// A profile addressed by a dispatch, with the tokens it contributed.
struct Recipient {
    uid: String,
    tokens: Vec<DeliveryToken>,
}

/// Runs task triggers against the store and the push dispatcher.
#[derive(Clone)]
pub struct TriggerProcessor {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    shutdown: Option<CancellationToken>,
}

impl TriggerProcessor {
    pub fn new(store: Arc<dyn Store>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            shutdown: None,
        }
    }

    /// Abandon pending retry backoffs once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Fire every trigger matching `change`, one after another.
    pub async fn handle_task_change(&self, change: &DocumentChange<Task>) -> Vec<TriggerOutcome> {
        let (task, triggers) = match change {
            DocumentChange::Created { after } => (after, TaskTrigger::on_created(after)),
            DocumentChange::Updated { before, after } => {
                (after, TaskTrigger::on_updated(before, after))
            }
            DocumentChange::Deleted { .. } => return Vec::new(),
        };

        let mut outcomes = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            outcomes.push(self.fire(trigger, task).await);
        }
        outcomes
    }

    async fn fire(&self, trigger: TaskTrigger, task: &Task) -> TriggerOutcome {
        tracing::info!(task_id = %task.id, trigger = %trigger, "Task trigger fired");

        let recipients = match self.resolve_recipients(trigger, task).await {
            Ok(Some(recipients)) => recipients,
            Ok(None) => {
                tracing::warn!(
                    task_id = %task.id,
                    user_id = %task.assigned_to,
                    "Assignee profile not found"
                );
                return TriggerOutcome::Skipped {
                    trigger,
                    reason: SkipReason::RecipientNotFound,
                };
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Recipient lookup failed");
                return TriggerOutcome::Skipped {
                    trigger,
                    reason: SkipReason::LookupFailed,
                };
            }
        };

        let tokens: Vec<DeliveryToken> = recipients
            .iter()
            .flat_map(|r| r.tokens.iter().cloned())
            .collect();

        if tokens.is_empty() {
            tracing::warn!(
                task_id = %task.id,
                trigger = %trigger,
                "No delivery tokens for recipients"
            );
            return TriggerOutcome::Skipped {
                trigger,
                reason: SkipReason::NoTokens,
            };
        }

        let actor_name = self.actor_name(trigger, task).await;
        let payload = trigger.build_payload(task, actor_name.as_deref());
        let result = self
            .dispatcher
            .dispatch_with(
                &payload,
                &tokens,
                self.dispatcher.policy().max_attempts,
                self.shutdown.as_ref(),
            )
            .await;

        if result.success {
            tracing::info!(
                task_id = %task.id,
                trigger = %trigger,
                delivered = result.delivered_count(),
                tokens = tokens.len(),
                "Notification sent"
            );
        } else {
            tracing::error!(
                task_id = %task.id,
                trigger = %trigger,
                error = ?result.error,
                "Notification could not be delivered"
            );
        }

        self.evict_invalid(&recipients, &result.invalid_tokens).await;

        TriggerOutcome::Dispatched { trigger, result }
    }

    /// `None` when the single addressed profile does not exist.
    async fn resolve_recipients(
        &self,
        trigger: TaskTrigger,
        task: &Task,
    ) -> Result<Option<Vec<Recipient>>, AppError> {
        let profiles = match trigger.audience() {
            Audience::Assignee => match self.store.get_user(&task.assigned_to).await? {
                Some(user) => vec![user],
                None => return Ok(None),
            },
            Audience::Admins => self.store.list_admins().await?,
        };

        Ok(Some(
            profiles
                .into_iter()
                .map(|p| Recipient {
                    tokens: p.delivery_tokens(),
                    uid: p.uid,
                })
                .collect(),
        ))
    }

    async fn actor_name(&self, trigger: TaskTrigger, task: &Task) -> Option<String> {
        let uid = match trigger.actor()? {
            Actor::Creator => &task.created_by,
            Actor::Assignee => &task.assigned_to,
        };

        match self.store.get_user(uid).await {
            Ok(user) => user.map(|u| u.name),
            Err(e) => {
                tracing::warn!(
                    user_id = %uid,
                    error = %e,
                    "Actor lookup failed, using default name"
                );
                None
            }
        }
    }

    /// Remove reported tokens from the profiles that own them.
    async fn evict_invalid(&self, recipients: &[Recipient], invalid: &[DeliveryToken]) {
        if invalid.is_empty() {
            return;
        }

        for recipient in recipients {
            let dead: Vec<DeliveryToken> = recipient
                .tokens
                .iter()
                .filter(|t| invalid.contains(t))
                .cloned()
                .collect();

            if dead.is_empty() {
                continue;
            }

            match self.store.remove_tokens(&recipient.uid, &dead).await {
                Ok(()) => tracing::info!(
                    user_id = %recipient.uid,
                    removed = dead.len(),
                    "Invalid tokens evicted"
                ),
                Err(e) => tracing::warn!(
                    user_id = %recipient.uid,
                    error = %e,
                    "Failed to evict invalid tokens"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use taskpush_common::types::{NotificationPayload, Role, TaskStatus};
    use taskpush_notifier::{BatchResponse, GatewayError, PushGateway, RetryPolicy, SendResponse};

    use super::*;
    use crate::fixtures::{task, user};
    use crate::store::MemoryStore;

    /// Records every call; tokens listed in `dead` are rejected as unregistered.
    #[derive(Default)]
    struct RecordingGateway {
        dead: Vec<&'static str>,
        sent: Mutex<Vec<(Vec<DeliveryToken>, NotificationPayload)>>,
    }

    impl RecordingGateway {
        fn rejection() -> GatewayError {
            GatewayError::Rejected {
                code: "messaging/registration-token-not-registered".to_string(),
                message: "not registered".to_string(),
            }
        }

        fn sent(&self) -> Vec<(Vec<DeliveryToken>, NotificationPayload)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        async fn send(
            &self,
            token: &DeliveryToken,
            payload: &NotificationPayload,
        ) -> Result<String, GatewayError> {
            self.sent
                .lock()
                .unwrap()
                .push((vec![token.clone()], payload.clone()));
            if self.dead.contains(&token.as_str()) {
                return Err(Self::rejection());
            }
            Ok("m/1".to_string())
        }

        async fn send_multicast(
            &self,
            tokens: &[DeliveryToken],
            payload: &NotificationPayload,
        ) -> Result<BatchResponse, GatewayError> {
            self.sent
                .lock()
                .unwrap()
                .push((tokens.to_vec(), payload.clone()));
            Ok(BatchResponse {
                responses: tokens
                    .iter()
                    .map(|t| {
                        if self.dead.contains(&t.as_str()) {
                            SendResponse::failed(Self::rejection())
                        } else {
                            SendResponse::delivered("m")
                        }
                    })
                    .collect(),
            })
        }
    }

    fn processor(store: Arc<MemoryStore>, gateway: Arc<RecordingGateway>) -> TriggerProcessor {
        let dispatcher = Dispatcher::new(gateway)
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
        TriggerProcessor::new(store, dispatcher)
    }

    fn team() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_users(vec![
            user("admin-1", "Marta", Role::Admin, &["adm-a"]),
            user("admin-2", "Luis", Role::Admin, &["adm-b", "adm-dead"]),
            user("u1", "Ana", Role::Normal, &["ana-phone"]),
            user("u2", "Pablo", Role::Normal, &[]),
        ]))
    }

    #[tokio::test]
    async fn test_created_task_notifies_assignee() {
        let store = team();
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(store, gateway.clone());

        let outcomes = processor
            .handle_task_change(&DocumentChange::Created {
                after: task("t1", "u1"),
            })
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0],
            TriggerOutcome::Dispatched { trigger: TaskTrigger::Assigned, result } if result.success
        ));

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec![DeliveryToken::new("ana-phone")]);
        assert!(sent[0].1.body.starts_with("Marta assigned you"));
    }

    #[tokio::test]
    async fn test_personal_task_sends_nothing() {
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(team(), gateway.clone());
        let mut personal = task("t1", "u1");
        personal.is_personal = true;

        let outcomes = processor
            .handle_task_change(&DocumentChange::Created { after: personal })
            .await;

        assert!(outcomes.is_empty());
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_review_submission_fans_out_to_admins() {
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(team(), gateway.clone());
        let before = task("t1", "u1");
        let mut after = before.clone();
        after.status = TaskStatus::PendingReview;

        let outcomes = processor
            .handle_task_change(&DocumentChange::Updated { before, after })
            .await;

        assert_eq!(outcomes.len(), 1);
        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0,
            vec![
                DeliveryToken::new("adm-a"),
                DeliveryToken::new("adm-b"),
                DeliveryToken::new("adm-dead"),
            ]
        );
        assert!(sent[0].1.body.starts_with("Ana submitted"));
    }

    #[tokio::test]
    async fn test_invalid_admin_token_is_evicted_from_owner() {
        let store = team();
        let gateway = Arc::new(RecordingGateway {
            dead: vec!["adm-dead"],
            ..Default::default()
        });
        let processor = processor(store.clone(), gateway);
        let before = task("t1", "u1");
        let mut after = before.clone();
        after.status = TaskStatus::PendingReview;

        processor
            .handle_task_change(&DocumentChange::Updated { before, after })
            .await;

        let luis = store.get_user("admin-2").await.unwrap().unwrap();
        assert_eq!(luis.fcm_tokens, vec!["adm-b".to_string()]);
        let marta = store.get_user("admin-1").await.unwrap().unwrap();
        assert_eq!(marta.fcm_tokens, vec!["adm-a".to_string()]);
    }

    #[tokio::test]
    async fn test_single_dead_token_is_evicted() {
        let store = team();
        let gateway = Arc::new(RecordingGateway {
            dead: vec!["ana-phone"],
            ..Default::default()
        });
        let processor = processor(store.clone(), gateway.clone());
        let before = task("t1", "u1");
        let mut after = before.clone();
        after.status = TaskStatus::Rejected;

        let outcomes = processor
            .handle_task_change(&DocumentChange::Updated { before, after })
            .await;

        assert!(matches!(
            &outcomes[0],
            TriggerOutcome::Dispatched { result, .. } if !result.success
        ));
        // Permanently invalid: sent once, not retried
        assert_eq!(gateway.sent().len(), 1);
        let ana = store.get_user("u1").await.unwrap().unwrap();
        assert!(ana.fcm_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_reassignment_targets_new_assignee() {
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(team(), gateway.clone());
        let before = task("t1", "u2");
        let after = task("t1", "u1");

        let outcomes = processor
            .handle_task_change(&DocumentChange::Updated { before, after })
            .await;

        assert!(matches!(
            &outcomes[0],
            TriggerOutcome::Dispatched { trigger: TaskTrigger::Reassigned, .. }
        ));
        assert_eq!(gateway.sent()[0].0, vec![DeliveryToken::new("ana-phone")]);
        assert_eq!(gateway.sent()[0].1.data["type"], "task_reassigned");
    }

    #[tokio::test]
    async fn test_missing_assignee_is_skipped() {
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(team(), gateway.clone());

        let outcomes = processor
            .handle_task_change(&DocumentChange::Created {
                after: task("t1", "ghost"),
            })
            .await;

        assert_eq!(
            outcomes,
            vec![TriggerOutcome::Skipped {
                trigger: TaskTrigger::Assigned,
                reason: SkipReason::RecipientNotFound,
            }]
        );
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_assignee_without_tokens_is_skipped() {
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(team(), gateway.clone());

        let outcomes = processor
            .handle_task_change(&DocumentChange::Created {
                after: task("t1", "u2"),
            })
            .await;

        assert_eq!(
            outcomes,
            vec![TriggerOutcome::Skipped {
                trigger: TaskTrigger::Assigned,
                reason: SkipReason::NoTokens,
            }]
        );
    }

    #[tokio::test]
    async fn test_deleted_task_is_ignored() {
        let gateway = Arc::new(RecordingGateway::default());
        let processor = processor(team(), gateway.clone());

        let outcomes = processor
            .handle_task_change(&DocumentChange::Deleted {
                before: task("t1", "u1"),
            })
            .await;

        assert!(outcomes.is_empty());
        assert!(gateway.sent().is_empty());
    }
}
