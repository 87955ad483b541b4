//! Push gateway seam.
//!
//! The dispatcher talks to the delivery service only through [`PushGateway`],
//! so the concrete client (FCM in production, scripted fakes in tests) is
//! constructed by the caller and injected.

use async_trait::async_trait;
use thiserror::Error;

use taskpush_common::types::{DeliveryToken, NotificationPayload};

/// Error codes that mark a token as permanently undeliverable.
pub const INVALID_TOKEN_CODES: &[&str] = &[
    "registration-token-not-registered",
    "invalid-registration-token",
    "messaging/invalid-registration-token",
];

/// Returns `true` if a gateway error code means the token will never work again.
pub fn is_invalid_token_code(code: &str) -> bool {
    INVALID_TOKEN_CODES.iter().any(|c| code.contains(c))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request never got a usable answer (connect, timeout, decode).
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway refused our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The gateway answered with an error for this request.
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

impl GatewayError {
    pub fn code(&self) -> Option<&str> {
        match self {
            GatewayError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Errors that say nothing about the target token and affect the whole call.
    pub fn is_call_level(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::Unauthorized(_)
        )
    }

    pub fn is_invalid_token(&self) -> bool {
        self.code().is_some_and(is_invalid_token_code)
    }
}

/// Outcome of one target inside a batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub message_id: Option<String>,
    pub error: Option<GatewayError>,
}

impl SendResponse {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: GatewayError) -> Self {
        Self {
            message_id: None,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-target outcomes of a batch send, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    pub responses: Vec<SendResponse>,
}

impl BatchResponse {
    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count()
    }
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send to a single target. Returns the gateway message id.
    async fn send(
        &self,
        token: &DeliveryToken,
        payload: &NotificationPayload,
    ) -> Result<String, GatewayError>;

    /// Send the same payload to several targets in one call.
    ///
    /// `Err` means the call as a whole failed; per-target failures are
    /// reported inside the [`BatchResponse`], one entry per token.
    async fn send_multicast(
        &self,
        tokens: &[DeliveryToken],
        payload: &NotificationPayload,
    ) -> Result<BatchResponse, GatewayError>;
}
