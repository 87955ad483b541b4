//! Per-user diagnostics: role, assigned tasks and a status histogram.

use std::collections::BTreeMap;

use serde::Serialize;

use taskpush_common::error::AppError;
use taskpush_common::types::{Role, Task, TaskStatus};

use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub is_personal: bool,
    pub assigned_to: String,
    pub created_by: String,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            status: task.status,
            is_personal: task.is_personal,
            assigned_to: task.assigned_to,
            created_by: task.created_by,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserReport {
    pub uid: String,
    pub name: String,
    pub role: Role,
    pub is_admin: bool,
    pub token_count: usize,
    pub tasks: Vec<TaskSummary>,
    pub status_counts: BTreeMap<String, usize>,
}

impl UserReport {
    pub async fn build(store: &dyn Store, uid: &str) -> Result<Self, AppError> {
        let user = store
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", uid)))?;

        let tasks = store.list_tasks_assigned_to(uid).await?;

        let mut status_counts = BTreeMap::new();
        for task in &tasks {
            *status_counts.entry(task.status.to_string()).or_insert(0) += 1;
        }

        Ok(Self {
            is_admin: user.is_admin(),
            token_count: user.delivery_tokens().len(),
            uid: user.uid,
            name: user.name,
            role: user.role,
            tasks: tasks.into_iter().map(TaskSummary::from).collect(),
            status_counts,
        })
    }
}
