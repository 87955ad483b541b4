//! Identity provider accounts.
//!
//! User creation registers a login account before writing the profile. The
//! production provider is the Identity Toolkit REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use taskpush_common::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("an account with this email already exists")]
    EmailExists,

    #[error("identity provider rejected the request: {0}")]
    Provider(String),

    #[error("identity provider unreachable: {0}")]
    Transport(String),
}

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::EmailExists => AppError::Conflict(e.to_string()),
            other => AppError::Identity(other.to_string()),
        }
    }
}

/// Creates login accounts.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an email/password account and return its uid.
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<String, IdentityError>;
}

/// Per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity Toolkit (`accounts` resource) client.
pub struct IdentityToolkitClient {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl IdentityToolkitClient {
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
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn transport_error(&self, e: reqwest::Error) -> IdentityError {
        if e.is_timeout() {
            IdentityError::Transport(format!(
                "request timed out after {}ms",
                self.request_timeout.as_millis()
            ))
        } else {
            IdentityError::Transport(e.to_string())
        }
    }

    fn accounts_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/accounts",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkitClient {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<String, IdentityError> {
        let response = self
            .client
            .post(self.accounts_url())
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .json(&json!({
                "email": email,
                "password": password,
                "displayName": display_name,
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            let created: SignUpResponse = serde_json::from_str(&text)
                .map_err(|e| IdentityError::Provider(format!("invalid response: {}", e)))?;
            return Ok(created.local_id);
        }

        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|envelope| envelope.error.message)
            .unwrap_or(text);

        // Messages look like "EMAIL_EXISTS" or "WEAK_PASSWORD : <detail>"
        if message.split(':').next().map(str::trim) == Some("EMAIL_EXISTS") {
            return Err(IdentityError::EmailExists);
        }

        Err(IdentityError::Provider(format!("{} {}", status.as_u16(), message)))
    }
}
