//! Document store access.
//!
//! The trigger engine, token registry and user service only see the [`Store`]
//! trait. [`PgStore`] is the production implementation; [`MemoryStore`] backs
//! tests and local tooling.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;

use taskpush_common::error::AppError;
use taskpush_common::types::{DeliveryToken, Role, Task, UserProfile};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserProfile>, AppError>;

    async fn list_admins(&self) -> Result<Vec<UserProfile>, AppError>;

    async fn insert_user(&self, user: &UserProfile) -> Result<(), AppError>;

    /// Drop `tokens` from one profile (list and legacy field).
    async fn remove_tokens(&self, uid: &str, tokens: &[DeliveryToken]) -> Result<(), AppError>;

    async fn find_users_with_any_token(
        &self,
        tokens: &[String],
    ) -> Result<Vec<UserProfile>, AppError>;

    /// Overwrite several token lists atomically, stamping `fcm_tokens_updated_at`.
    async fn replace_tokens(&self, updates: &[(String, Vec<String>)]) -> Result<(), AppError>;

    async fn list_tasks_assigned_to(&self, uid: &str) -> Result<Vec<Task>, AppError>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserProfile>, AppError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE name = $1 LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list_admins(&self) -> Result<Vec<UserProfile>, AppError> {
        let admins = sqlx::query_as("SELECT * FROM users WHERE role = $1 ORDER BY uid")
            .bind(Role::Admin.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(admins)
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                uid, email, name, role, username, has_password,
                created_at, last_login, fcm_tokens, fcm_token, fcm_tokens_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&user.uid)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.to_string())
        .bind(&user.username)
        .bind(user.has_password)
        .bind(user.created_at)
        .bind(user.last_login)
        .bind(&user.fcm_tokens)
        .bind(&user.fcm_token)
        .bind(user.fcm_tokens_updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_tokens(&self, uid: &str, tokens: &[DeliveryToken]) -> Result<(), AppError> {
        let tokens: Vec<String> = tokens.iter().map(|t| t.as_str().to_string()).collect();

        sqlx::query(
            r#"
            UPDATE users
            SET fcm_tokens = ARRAY(SELECT t FROM unnest(fcm_tokens) AS t WHERE t <> ALL($2)),
                fcm_token = CASE WHEN fcm_token = ANY($2) THEN NULL ELSE fcm_token END,
                fcm_tokens_updated_at = NOW()
            WHERE uid = $1
            "#,
        )
        .bind(uid)
        .bind(&tokens)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_users_with_any_token(
        &self,
        tokens: &[String],
    ) -> Result<Vec<UserProfile>, AppError> {
        let users = sqlx::query_as("SELECT * FROM users WHERE fcm_tokens && $1")
            .bind(tokens)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn replace_tokens(&self, updates: &[(String, Vec<String>)]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for (uid, tokens) in updates {
            sqlx::query(
                "UPDATE users SET fcm_tokens = $2, fcm_tokens_updated_at = NOW() WHERE uid = $1",
            )
            .bind(uid)
            .bind(tokens)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_tasks_assigned_to(&self, uid: &str) -> Result<Vec<Task>, AppError> {
        let tasks = sqlx::query_as("SELECT * FROM tasks WHERE assigned_to = $1 ORDER BY created_at")
            .bind(uid)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }
}

/// In-memory store with the same semantics as [`PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<BTreeMap<String, UserProfile>>,
    tasks: RwLock<Vec<Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserProfile>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.uid.clone(), u)).collect()),
            tasks: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_task(&self, task: Task) {
        self.tasks.write().await.push(task);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserProfile>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.name == name)
            .cloned())
    }

    async fn list_admins(&self) -> Result<Vec<UserProfile>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.is_admin())
            .cloned()
            .collect())
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.uid) {
            return Err(AppError::Conflict(format!("User {} already exists", user.uid)));
        }
        users.insert(user.uid.clone(), user.clone());
        Ok(())
    }

    async fn remove_tokens(&self, uid: &str, tokens: &[DeliveryToken]) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(uid) {
            user.fcm_tokens
                .retain(|t| !tokens.iter().any(|dead| dead.as_str() == t));
            if user
                .fcm_token
                .as_deref()
                .is_some_and(|t| tokens.iter().any(|dead| dead.as_str() == t))
            {
                user.fcm_token = None;
            }
            user.fcm_tokens_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_users_with_any_token(
        &self,
        tokens: &[String],
    ) -> Result<Vec<UserProfile>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.fcm_tokens.iter().any(|t| tokens.contains(t)))
            .cloned()
            .collect())
    }

    async fn replace_tokens(&self, updates: &[(String, Vec<String>)]) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let now = Utc::now();
        for (uid, tokens) in updates {
            if let Some(user) = users.get_mut(uid) {
                user.fcm_tokens = tokens.clone();
                user.fcm_tokens_updated_at = Some(now);
            }
        }
        Ok(())
    }

    async fn list_tasks_assigned_to(&self, uid: &str) -> Result<Vec<Task>, AppError> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.assigned_to == uid)
            .cloned()
            .collect())
    }
}
