//! Taskpush engine: task triggers, token registry, user administration.

pub mod change;
pub mod dedup;
pub mod identity;
pub mod inspect;
pub mod processor;
pub mod store;
pub mod tokens;
pub mod triggers;
pub mod users;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;

    use taskpush_common::types::{Role, Task, TaskStatus, UserProfile};

    pub fn task(id: &str, assigned_to: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: "Paint the fence".to_string(),
            status: TaskStatus::InProgress,
            assigned_to: assigned_to.to_string(),
            created_by: "admin-1".to_string(),
            is_personal: false,
            priority: None,
            review_comment: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user(uid: &str, name: &str, role: Role, tokens: &[&str]) -> UserProfile {
        UserProfile {
            uid: uid.to_string(),
            email: format!("{}@gmail.com", name.to_lowercase()),
            name: name.to_string(),
            role,
            username: name.to_lowercase(),
            has_password: true,
            created_at: Utc::now(),
            last_login: None,
            fcm_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fcm_token: None,
            fcm_tokens_updated_at: None,
        }
    }
}
