//! Change-feed events.
//!
//! Every row change is recorded in the `change_events` table and announced on
//! a channel with a small notice: `{event_id, table, op, id}`. The before and
//! after images stay in the table, so document size never limits the feed.
//! Delivery is at-least-once and unordered across documents, so consumers key
//! idempotency on `event_id`.

use std::str::FromStr;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use taskpush_common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl FromStr for ChangeOp {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeOp::Insert),
            "UPDATE" => Ok(ChangeOp::Update),
            "DELETE" => Ok(ChangeOp::Delete),
            other => Err(ChangeError::UnknownOp(other.to_string())),
        }
    }
}

/// Channel notification announcing a recorded change.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeNotice {
    pub event_id: Uuid,
    pub table: String,
    pub op: ChangeOp,
    pub id: String,
}

impl ChangeNotice {
    pub fn parse(payload: &str) -> Result<Self, ChangeError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// A recorded change with its raw before/after images.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    pub event_id: Uuid,
    pub table: String,
    pub op: ChangeOp,
    pub id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

/// A change decoded into typed before/after documents.
#[derive(Debug, Clone)]
pub enum DocumentChange<T> {
    Created { after: T },
    Updated { before: T, after: T },
    Deleted { before: T },
}

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("malformed change event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown change operation '{0}'")]
    UnknownOp(String),

    #[error("{op:?} event {event_id} is missing its {side} document")]
    MissingDocument {
        event_id: Uuid,
        op: ChangeOp,
        side: &'static str,
    },
}

impl ChangeEvent {
    /// Decode the before/after documents required by `op`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<DocumentChange<T>, ChangeError> {
        match self.op {
            ChangeOp::Insert => Ok(DocumentChange::Created {
                after: self.document(&self.after, "after")?,
            }),
            ChangeOp::Update => Ok(DocumentChange::Updated {
                before: self.document(&self.before, "before")?,
                after: self.document(&self.after, "after")?,
            }),
            ChangeOp::Delete => Ok(DocumentChange::Deleted {
                before: self.document(&self.before, "before")?,
            }),
        }
    }

    fn document<T: DeserializeOwned>(
        &self,
        value: &Option<serde_json::Value>,
        side: &'static str,
    ) -> Result<T, ChangeError> {
        match value {
            Some(v) if !v.is_null() => Ok(T::deserialize(v)?),
            _ => Err(ChangeError::MissingDocument {
                event_id: self.event_id,
                op: self.op,
                side,
            }),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChangeEventRow {
    event_id: Uuid,
    table_name: String,
    op: String,
    doc_id: String,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
}

impl TryFrom<ChangeEventRow> for ChangeEvent {
    type Error = ChangeError;

    fn try_from(row: ChangeEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: row.event_id,
            table: row.table_name,
            op: row.op.parse()?,
            id: row.doc_id,
            before: row.before,
            after: row.after,
        })
    }
}

/// Access to the `change_events` table.
#[derive(Clone)]
pub struct ChangeLog {
    pool: PgPool,
}

impl ChangeLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a recorded change. `None` when it was already consumed.
    pub async fn fetch(&self, event_id: Uuid) -> Result<Option<ChangeEvent>, AppError> {
        let row: Option<ChangeEventRow> = sqlx::query_as(
            r#"
            SELECT event_id, table_name, op, doc_id, before, after
            FROM change_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChangeEvent::try_from)
            .transpose()
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    /// Drop a consumed change.
    pub async fn remove(&self, event_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM change_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop changes nobody consumed within `max_age_seconds`.
    pub async fn prune(&self, max_age_seconds: u64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM change_events WHERE created_at < NOW() - make_interval(secs => $1)",
        )
        .bind(max_age_seconds as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
