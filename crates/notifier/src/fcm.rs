//! FCM HTTP v1 push gateway.
//!
//! Single sends are one `messages:send` request. Batch sends fan out one
//! request per token with bounded concurrency; results keep input order.
//! FCM error statuses are translated into stable `messaging/*` codes so the
//! dispatcher can recognise dead tokens. Every request is bounded by a
//! timeout; a timed-out request is a transport failure and gets retried.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use taskpush_common::types::{DeliveryToken, NotificationPayload};

use crate::gateway::{BatchResponse, GatewayError, PushGateway, SendResponse};

/// Concurrent requests per batch send.
const DEFAULT_CONCURRENCY: usize = 16;

/// Per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// FCM client bound to one project and access token.
pub struct FcmGateway {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: String,
    concurrency: usize,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SendOk {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

impl FcmGateway {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            access_token: access_token.into(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }

    /// Request body for one target. The payload itself is never modified.
    fn message_body(token: &DeliveryToken, payload: &NotificationPayload) -> serde_json::Value {
        json!({
            "message": {
                "token": token.as_str(),
                "notification": {
                    "title": payload.title,
                    "body": payload.body,
                },
                "data": payload.data,
            }
        })
    }

    async fn send_one(
        &self,
        token: &DeliveryToken,
        payload: &NotificationPayload,
    ) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .json(&Self::message_body(token, payload))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            let ok: SendOk = serde_json::from_str(&text)
                .map_err(|e| GatewayError::Transport(format!("invalid FCM response: {}", e)))?;
            return Ok(ok.name);
        }

        let body = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|envelope| envelope.error)
            .unwrap_or_else(|_| ErrorBody {
                message: text,
                ..ErrorBody::default()
            });

        Err(map_error(status.as_u16(), body))
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Transport(format!(
                "FCM request timed out after {}ms",
                self.request_timeout.as_millis()
            ))
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Translate an FCM error response into a gateway error.
fn map_error(http_status: u16, body: ErrorBody) -> GatewayError {
    let fcm_code = body
        .details
        .iter()
        .find_map(|d| d.error_code.clone())
        .unwrap_or_else(|| body.status.clone());

    let code = match fcm_code.as_str() {
        "UNREGISTERED" => "messaging/registration-token-not-registered",
        "INVALID_ARGUMENT" if body.message.to_lowercase().contains("registration token") => {
            "messaging/invalid-registration-token"
        }
        "INVALID_ARGUMENT" => "messaging/invalid-argument",
        "SENDER_ID_MISMATCH" => "messaging/mismatched-credential",
        "QUOTA_EXCEEDED" => "messaging/message-rate-exceeded",
        "UNAVAILABLE" => "messaging/server-unavailable",
        "INTERNAL" => "messaging/internal-error",
        "THIRD_PARTY_AUTH_ERROR" => "messaging/third-party-auth-error",
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => {
            return GatewayError::Unauthorized(body.message);
        }
        _ if http_status == 401 || http_status == 403 => {
            return GatewayError::Unauthorized(body.message);
        }
        _ => "messaging/unknown-error",
    };

    GatewayError::Rejected {
        code: code.to_string(),
        message: body.message,
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(
        &self,
        token: &DeliveryToken,
        payload: &NotificationPayload,
    ) -> Result<String, GatewayError> {
        self.send_one(token, payload).await
    }

    async fn send_multicast(
        &self,
        tokens: &[DeliveryToken],
        payload: &NotificationPayload,
    ) -> Result<BatchResponse, GatewayError> {
        if tokens.is_empty() {
            return Ok(BatchResponse::default());
        }

        let pending: Vec<_> = tokens
            .iter()
            .map(|token| self.send_one(token, payload))
            .collect();
        let results: Vec<Result<String, GatewayError>> = futures::stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await;

        // Nothing reached FCM: fail the call so the dispatcher can retry it.
        if results
            .iter()
            .all(|r| matches!(r, Err(e) if e.is_call_level()))
        {
            let first = results
                .into_iter()
                .find_map(Result::err)
                .unwrap_or_else(|| GatewayError::Transport("no response".to_string()));
            return Err(first);
        }

        Ok(BatchResponse {
            responses: results
                .into_iter()
                .map(|r| match r {
                    Ok(name) => SendResponse::delivered(name),
                    Err(e) => SendResponse::failed(e),
                })
                .collect(),
        })
    }
}
