use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Postgres;
use sqlx::postgres::{PgTypeInfo, PgValueRef};

/// Lifecycle status of a task, as stored in the `tasks.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    PendingReview,
    Completed,
    Confirmed,
    Rejected,
    /// Any status written by a newer client. Never matches a transition.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::PendingReview => write!(f, "pending_review"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Confirmed => write!(f, "confirmed"),
            TaskStatus::Rejected => write!(f, "rejected"),
            TaskStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => TaskStatus::Pending,
            "in_progress" => TaskStatus::InProgress,
            "pending_review" => TaskStatus::PendingReview,
            "completed" => TaskStatus::Completed,
            "confirmed" => TaskStatus::Confirmed,
            "rejected" => TaskStatus::Rejected,
            _ => TaskStatus::Unknown,
        }
    }
}

// Decoded by hand so an unrecognised column value reads as `Unknown`
// instead of failing the whole row.
impl sqlx::Type<Postgres> for TaskStatus {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for TaskStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<'r, Postgres>>::decode(value)?;
        Ok(TaskStatus::from(raw))
    }
}

/// Role of a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    Normal,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Normal => write!(f, "normal"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Role::Normal),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A task document.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub assigned_to: String,
    pub created_by: String,
    #[serde(default)]
    pub is_personal: bool,
    pub priority: Option<String>,
    pub review_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user profile document.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub username: String,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    /// Current device registrations.
    #[serde(default)]
    pub fcm_tokens: Vec<String>,
    /// Single-token field written by old clients.
    pub fcm_token: Option<String>,
    pub fcm_tokens_updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Tokens to address this user with. Once the token list has been
    /// written it is authoritative, even when empty; before that the legacy
    /// single token is used.
    pub fn delivery_tokens(&self) -> Vec<DeliveryToken> {
        if !self.fcm_tokens.is_empty() || self.fcm_tokens_updated_at.is_some() {
            return self
                .fcm_tokens
                .iter()
                .map(|t| DeliveryToken::new(t.as_str()))
                .collect();
        }

        self.fcm_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| vec![DeliveryToken::new(t)])
            .unwrap_or_default()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Opaque push registration of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeliveryToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for DeliveryToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl AsRef<str> for DeliveryToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Push notification content, identical for every target of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Short title (e.g., "New task assigned")
    pub title: String,
    /// Detailed body message
    pub body: String,
    /// String key/value pairs delivered to the client app
    pub data: BTreeMap<String, String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
