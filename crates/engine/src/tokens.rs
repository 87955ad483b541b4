//! Token registry hygiene.
//!
//! A device token belongs to exactly one profile: when a user registers a
//! token that another profile still holds (shared device, account switch),
//! the stale copy is removed from the other profile.

use taskpush_common::error::AppError;
use taskpush_common::types::UserProfile;

use crate::change::DocumentChange;
use crate::store::Store;

/// Handle a user-profile change from the feed. Only updates are checked.
pub async fn on_user_change(
    store: &dyn Store,
    change: &DocumentChange<UserProfile>,
) -> Result<usize, AppError> {
    match change {
        DocumentChange::Updated { after, .. } => {
            ensure_unique_tokens(store, &after.uid, &after.fcm_tokens).await
        }
        _ => Ok(0),
    }
}

/// Remove `tokens` from every profile other than `owner`.
///
/// Returns the number of profiles changed. All changes are written in one
/// store transaction; nothing is written when there is no conflict.
pub async fn ensure_unique_tokens(
    store: &dyn Store,
    owner: &str,
    tokens: &[String],
) -> Result<usize, AppError> {
    let tokens: Vec<String> = tokens.iter().filter(|t| !t.is_empty()).cloned().collect();
    if tokens.is_empty() {
        return Ok(0);
    }

    let holders = store.find_users_with_any_token(&tokens).await?;

    let updates: Vec<(String, Vec<String>)> = holders
        .into_iter()
        .filter(|u| u.uid != owner)
        .map(|u| {
            let kept = u
                .fcm_tokens
                .into_iter()
                .filter(|t| !tokens.contains(t))
                .collect();
            (u.uid, kept)
        })
        .collect();

    if updates.is_empty() {
        return Ok(0);
    }

    store.replace_tokens(&updates).await?;

    for (uid, _) in &updates {
        tracing::info!(user_id = %uid, owner = %owner, "Duplicated tokens removed from profile");
    }

    Ok(updates.len())
}
