//! User administration routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use taskpush_common::error::AppError;
use taskpush_engine::inspect::UserReport;
use taskpush_engine::users::{CreateUserParams, CreatedUser, UserService};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/{uid}/report", get(user_report))
}

/// POST /api/users: Create a login account and profile. Admin only.
async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(params): Json<CreateUserParams>,
) -> Result<Json<CreatedUser>, AppError> {
    let created = UserService::create(
        state.store.as_ref(),
        state.identity.as_ref(),
        &auth.uid,
        &params,
        &state.config.user_email_domain,
    )
    .await?;
    Ok(Json(created))
}

/// GET /api/users/:uid/report: Role and assigned tasks of a user. Admin only.
async fn user_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(uid): Path<String>,
) -> Result<Json<UserReport>, AppError> {
    let caller = state.store.get_user(&auth.uid).await?;
    if !caller.is_some_and(|c| c.is_admin()) {
        return Err(AppError::Forbidden(
            "Only administrators can inspect users".to_string(),
        ));
    }

    let report = UserReport::build(state.store.as_ref(), &uid).await?;
    Ok(Json(report))
}
