//! User service: admin-only account creation.
//!
//! Creating a user registers a login account with the identity provider and
//! writes the matching profile. Users sign in with a synthetic email derived
//! from their display name.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use taskpush_common::error::AppError;
use taskpush_common::types::{Role, UserProfile};

use crate::identity::IdentityProvider;
use crate::store::Store;

const MIN_PASSWORD_LEN: usize = 6;

/// Service layer for user administration.
pub struct UserService;

/// Parameters for creating a new user. Missing fields fail validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedUser {
    pub success: bool,
    pub uid: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub message: String,
}

/// Login name: lowercase, all whitespace removed.
pub fn normalize_username(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl UserService {
    /// Create a user on behalf of `caller_uid`, who must be an admin.
    pub async fn create(
        store: &dyn Store,
        identity: &dyn IdentityProvider,
        caller_uid: &str,
        params: &CreateUserParams,
        email_domain: &str,
    ) -> Result<CreatedUser, AppError> {
        let caller = store.get_user(caller_uid).await?;
        if !caller.as_ref().is_some_and(UserProfile::is_admin) {
            return Err(AppError::Forbidden(
                "Only administrators can create users".to_string(),
            ));
        }

        let (name, role) = Self::validate(params)?;

        if store.find_user_by_name(name).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "A user named '{}' already exists",
                name
            )));
        }

        let username = normalize_username(name);
        let email = format!("{}@{}", username, email_domain);

        let uid = identity
            .create_account(&email, &params.password, name)
            .await?;

        let now = Utc::now();
        let profile = UserProfile {
            uid: uid.clone(),
            email: email.clone(),
            name: name.to_string(),
            role,
            username,
            has_password: true,
            created_at: now,
            last_login: Some(now),
            fcm_tokens: Vec::new(),
            fcm_token: None,
            fcm_tokens_updated_at: None,
        };
        store.insert_user(&profile).await?;

        tracing::info!(user_id = %uid, role = %role, created_by = %caller_uid, "User created");

        Ok(CreatedUser {
            success: true,
            uid,
            email,
            name: name.to_string(),
            role,
            message: format!("User {} created successfully", name),
        })
    }

    /// Returns the trimmed name and parsed role.
    fn validate(params: &CreateUserParams) -> Result<(&str, Role), AppError> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        if params.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let role = params.role.parse::<Role>().map_err(|_| {
            AppError::Validation(format!(
                "Invalid role '{}'. Valid roles: normal, admin",
                params.role
            ))
        })?;

        Ok((name, role))
    }
}
