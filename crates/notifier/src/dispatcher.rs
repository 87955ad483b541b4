//! Notification dispatcher: bounded retry and token hygiene.
//!
//! One dispatch call:
//! 1. Collapses the token set (duplicates and empty tokens dropped)
//! 2. Sends a single-target request for one token, a batch for several
//! 3. Retries the whole call with exponential backoff when the gateway call
//!    itself fails, up to `max_attempts`
//! 4. Reports tokens the gateway rejected as permanently invalid
//!
//! Per-token failures inside a successful batch are reported but never
//! retried. The dispatcher does not touch recipient profiles; the caller
//! evicts `invalid_tokens`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use taskpush_common::types::{DeliveryToken, NotificationPayload};

use crate::gateway::{BatchResponse, GatewayError, PushGateway};

/// Default number of transport attempts per dispatch.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff delay.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);

/// Fixed exponential backoff, no jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait between failed attempt `attempt` (1-based) and the next one:
    /// `base_delay * 2^attempt`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Longest total sleep a dispatch can spend before giving up.
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_after_attempt(attempt))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no recipient tokens provided")]
    NoRecipients,

    #[error("push gateway failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        source: GatewayError,
    },

    #[error("token {0} is no longer registered")]
    InvalidToken(DeliveryToken),

    #[error("dispatch cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

/// Delivery outcome of one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOutcome {
    pub token: DeliveryToken,
    pub success: bool,
    pub message_id: Option<String>,
    pub error_kind: Option<String>,
}

impl TokenOutcome {
    fn delivered(token: &DeliveryToken, message_id: Option<String>) -> Self {
        Self {
            token: token.clone(),
            success: true,
            message_id,
            error_kind: None,
        }
    }

    fn failed(token: &DeliveryToken, error: &GatewayError) -> Self {
        Self {
            token: token.clone(),
            success: false,
            message_id: None,
            error_kind: Some(
                error
                    .code()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            ),
        }
    }
}

/// Result of one dispatch call. Built per call and handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// The gateway accepted the call. A batch with per-token failures still
    /// counts as success.
    pub success: bool,
    /// Transport attempts made.
    pub attempts: u32,
    /// One entry per token, in input order. Empty when no attempt succeeded.
    pub responses: Vec<TokenOutcome>,
    /// Tokens the gateway reported as permanently undeliverable.
    pub invalid_tokens: Vec<DeliveryToken>,
    pub error: Option<DispatchError>,
}

impl DeliveryResult {
    fn failed(error: DispatchError, attempts: u32) -> Self {
        Self {
            success: false,
            attempts,
            responses: Vec::new(),
            invalid_tokens: Vec::new(),
            error: Some(error),
        }
    }

    pub fn delivered_count(&self) -> usize {
        self.responses.iter().filter(|r| r.success).count()
    }
}

/// Sends payloads through an injected [`PushGateway`].
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn PushGateway>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            gateway,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatch using the configured retry policy and no cancellation.
    pub async fn dispatch(
        &self,
        payload: &NotificationPayload,
        tokens: &[DeliveryToken],
    ) -> DeliveryResult {
        self.dispatch_with(payload, tokens, self.policy.max_attempts, None)
            .await
    }

    /// Dispatch with an explicit attempt budget and optional cancellation.
    ///
    /// Cancelling abandons the remaining retry schedule; a gateway call that
    /// is already in flight is allowed to finish.
    pub async fn dispatch_with(
        &self,
        payload: &NotificationPayload,
        tokens: &[DeliveryToken],
        max_attempts: u32,
        cancel: Option<&CancellationToken>,
    ) -> DeliveryResult {
        let tokens = unique_tokens(tokens);
        if tokens.is_empty() {
            tracing::warn!(title = %payload.title, "No recipient tokens, nothing to dispatch");
            return DeliveryResult::failed(DispatchError::NoRecipients, 0);
        }

        let max_attempts = max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return DeliveryResult::failed(
                    DispatchError::Cancelled { attempts: attempt },
                    attempt,
                );
            }

            attempt += 1;

            match self.attempt(payload, &tokens).await {
                Ok(mut result) => {
                    result.attempts = attempt;
                    if !result.invalid_tokens.is_empty() {
                        tracing::warn!(
                            invalid = result.invalid_tokens.len(),
                            "Gateway reported invalid tokens"
                        );
                    }
                    tracing::debug!(
                        attempt,
                        tokens = tokens.len(),
                        delivered = result.delivered_count(),
                        "Dispatch finished"
                    );
                    return result;
                }
                Err(error) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %error,
                        "Push attempt failed"
                    );

                    if attempt >= max_attempts {
                        return DeliveryResult::failed(
                            DispatchError::Transport {
                                attempts: attempt,
                                source: error,
                            },
                            attempt,
                        );
                    }

                    let delay = self.policy.delay_after_attempt(attempt);
                    if wait_or_cancel(delay, cancel).await {
                        tracing::info!(attempt, "Dispatch cancelled during backoff");
                        return DeliveryResult::failed(
                            DispatchError::Cancelled { attempts: attempt },
                            attempt,
                        );
                    }
                }
            }
        }
    }

    /// One transport attempt. `Err` means the whole call failed and may be retried.
    async fn attempt(
        &self,
        payload: &NotificationPayload,
        tokens: &[DeliveryToken],
    ) -> Result<DeliveryResult, GatewayError> {
        if let [token] = tokens {
            return match self.gateway.send(token, payload).await {
                Ok(message_id) => Ok(DeliveryResult {
                    success: true,
                    attempts: 0,
                    responses: vec![TokenOutcome::delivered(token, Some(message_id))],
                    invalid_tokens: Vec::new(),
                    error: None,
                }),
                Err(error) if error.is_invalid_token() => Ok(DeliveryResult {
                    success: false,
                    attempts: 0,
                    responses: vec![TokenOutcome::failed(token, &error)],
                    invalid_tokens: vec![token.clone()],
                    error: Some(DispatchError::InvalidToken(token.clone())),
                }),
                Err(error) => Err(error),
            };
        }

        let batch = self.gateway.send_multicast(tokens, payload).await?;
        Ok(Self::collect_batch(tokens, &batch))
    }

    fn collect_batch(tokens: &[DeliveryToken], batch: &BatchResponse) -> DeliveryResult {
        let missing = GatewayError::Rejected {
            code: "messaging/missing-response".to_string(),
            message: "gateway returned no outcome for this token".to_string(),
        };

        let mut responses = Vec::with_capacity(tokens.len());
        let mut invalid_tokens = Vec::new();

        for (idx, token) in tokens.iter().enumerate() {
            let outcome = match batch.responses.get(idx) {
                Some(response) => match &response.error {
                    None => TokenOutcome::delivered(token, response.message_id.clone()),
                    Some(error) => {
                        if error.is_invalid_token() {
                            invalid_tokens.push(token.clone());
                        }
                        TokenOutcome::failed(token, error)
                    }
                },
                None => TokenOutcome::failed(token, &missing),
            };
            responses.push(outcome);
        }

        DeliveryResult {
            success: true,
            attempts: 0,
            responses,
            invalid_tokens,
            error: None,
        }
    }
}

/// Drop duplicates and empty tokens, keeping first-occurrence order.
fn unique_tokens(tokens: &[DeliveryToken]) -> Vec<DeliveryToken> {
    let mut seen = HashSet::new();
    tokens
        .iter()
        .filter(|t| !t.as_str().is_empty() && seen.insert(t.as_str()))
        .cloned()
        .collect()
}

/// Sleep for `delay`; returns `true` if cancelled first.
async fn wait_or_cancel(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(cancel) => tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = cancel.cancelled() => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            false
        }
    }
}
