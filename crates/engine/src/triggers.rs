//! Task transition detection and notification wording.
//!
//! Every trigger is a plain comparison between the before/after task
//! documents. Several triggers may fire for the same update; each is handled
//! independently by the processor.

use taskpush_common::types::{NotificationPayload, Task, TaskStatus};

/// Fallback name when the task creator's profile is missing.
const DEFAULT_ADMIN_NAME: &str = "Admin";

/// Fallback name when the assignee's profile is missing.
const DEFAULT_USER_NAME: &str = "A user";

const DEFAULT_PRIORITY: &str = "medium";

/// A task state transition that produces a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTrigger {
    Assigned,
    Rejected,
    Approved,
    Reassigned,
    ReviewSubmitted,
    ReviewApproved,
    ReviewRejected,
}

/// Who receives a trigger's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// The task's (current) assignee.
    Assignee,
    /// Every admin profile.
    Admins,
}

/// Whose name appears in the notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Creator,
    Assignee,
}

impl TaskTrigger {
    /// Triggers for a newly created task.
    pub fn on_created(task: &Task) -> Vec<TaskTrigger> {
        if task.is_personal {
            return Vec::new();
        }
        vec![TaskTrigger::Assigned]
    }

    /// Triggers for an updated task, in a fixed order.
    pub fn on_updated(before: &Task, after: &Task) -> Vec<TaskTrigger> {
        let entered = |status: TaskStatus| before.status != status && after.status == status;
        let moved = |from: TaskStatus, to: TaskStatus| before.status == from && after.status == to;

        let mut triggers = Vec::new();
        if entered(TaskStatus::Rejected) {
            triggers.push(TaskTrigger::Rejected);
        }
        if entered(TaskStatus::Confirmed) {
            triggers.push(TaskTrigger::Approved);
        }
        if before.assigned_to != after.assigned_to {
            triggers.push(TaskTrigger::Reassigned);
        }
        if entered(TaskStatus::PendingReview) {
            triggers.push(TaskTrigger::ReviewSubmitted);
        }
        if moved(TaskStatus::PendingReview, TaskStatus::Completed) {
            triggers.push(TaskTrigger::ReviewApproved);
        }
        if moved(TaskStatus::PendingReview, TaskStatus::InProgress) {
            triggers.push(TaskTrigger::ReviewRejected);
        }
        triggers
    }

    pub fn audience(&self) -> Audience {
        match self {
            TaskTrigger::ReviewSubmitted => Audience::Admins,
            _ => Audience::Assignee,
        }
    }

    /// The profile whose name the body mentions, if any.
    pub fn actor(&self) -> Option<Actor> {
        match self {
            TaskTrigger::Assigned | TaskTrigger::Reassigned => Some(Actor::Creator),
            TaskTrigger::ReviewSubmitted => Some(Actor::Assignee),
            _ => None,
        }
    }

    /// Value of the `type` data field read by the client app.
    pub fn notification_type(&self) -> &'static str {
        match self {
            TaskTrigger::Assigned => "task_assigned",
            TaskTrigger::Rejected => "task_rejected",
            TaskTrigger::Approved => "task_approved",
            TaskTrigger::Reassigned => "task_reassigned",
            TaskTrigger::ReviewSubmitted => "task_review_submitted",
            TaskTrigger::ReviewApproved => "task_review_approved",
            TaskTrigger::ReviewRejected => "task_review_rejected",
        }
    }

    /// Build the notification for `task`. `actor_name` is the resolved name
    /// of [`TaskTrigger::actor`], when one was found.
    pub fn build_payload(&self, task: &Task, actor_name: Option<&str>) -> NotificationPayload {
        let creator = actor_name.unwrap_or(DEFAULT_ADMIN_NAME);
        let priority = task.priority.as_deref().unwrap_or(DEFAULT_PRIORITY);

        let payload = match self {
            TaskTrigger::Assigned => NotificationPayload::new(
                "📋 New task assigned",
                format!("{} assigned you: \"{}\"", creator, task.title),
            )
            .with_data("priority", priority),
            TaskTrigger::Rejected => NotificationPayload::new(
                "❌ Task rejected",
                format!("The task \"{}\" was rejected", task.title),
            )
            .with_data(
                "reviewComment",
                task.review_comment
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .unwrap_or("No comments"),
            ),
            TaskTrigger::Approved => NotificationPayload::new(
                "✅ Task approved",
                format!("The task \"{}\" was approved by the admin", task.title),
            )
            .with_data(
                "reviewComment",
                task.review_comment.as_deref().unwrap_or_default(),
            ),
            TaskTrigger::Reassigned => NotificationPayload::new(
                "📋 Task reassigned",
                format!("{} reassigned the task \"{}\" to you", creator, task.title),
            )
            .with_data("priority", priority),
            TaskTrigger::ReviewSubmitted => NotificationPayload::new(
                "📥 Task submitted for review",
                format!(
                    "{} submitted the task \"{}\" for review",
                    actor_name.unwrap_or(DEFAULT_USER_NAME),
                    task.title
                ),
            ),
            TaskTrigger::ReviewApproved => NotificationPayload::new(
                "✅ Task approved",
                format!("Your task \"{}\" was approved by the admin", task.title),
            ),
            TaskTrigger::ReviewRejected => NotificationPayload::new(
                "❌ Review rejected",
                format!(
                    "Your task \"{}\" was sent back; check the admin's comments",
                    task.title
                ),
            ),
        };

        payload
            .with_data("taskId", task.id.as_str())
            .with_data("type", self.notification_type())
    }
}

impl std::fmt::Display for TaskTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.notification_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::task;

    fn with_status(status: TaskStatus) -> Task {
        let mut t = task("t1", "u1");
        t.status = status;
        t
    }

    #[test]
    fn test_created_task_is_assigned() {
        assert_eq!(
            TaskTrigger::on_created(&task("t1", "u1")),
            vec![TaskTrigger::Assigned]
        );
    }

    #[test]
    fn test_personal_task_is_silent() {
        let mut t = task("t1", "u1");
        t.is_personal = true;
        assert!(TaskTrigger::on_created(&t).is_empty());
    }

    #[test]
    fn test_entering_rejected() {
        let before = with_status(TaskStatus::InProgress);
        let after = with_status(TaskStatus::Rejected);
        assert_eq!(
            TaskTrigger::on_updated(&before, &after),
            vec![TaskTrigger::Rejected]
        );
        // Staying rejected does not fire again
        assert!(TaskTrigger::on_updated(&after, &after).is_empty());
    }

    #[test]
    fn test_entering_confirmed() {
        let before = with_status(TaskStatus::Completed);
        let after = with_status(TaskStatus::Confirmed);
        assert_eq!(
            TaskTrigger::on_updated(&before, &after),
            vec![TaskTrigger::Approved]
        );
    }

    #[test]
    fn test_review_lifecycle() {
        let working = with_status(TaskStatus::InProgress);
        let review = with_status(TaskStatus::PendingReview);
        let done = with_status(TaskStatus::Completed);

        assert_eq!(
            TaskTrigger::on_updated(&working, &review),
            vec![TaskTrigger::ReviewSubmitted]
        );
        assert_eq!(
            TaskTrigger::on_updated(&review, &done),
            vec![TaskTrigger::ReviewApproved]
        );
        assert_eq!(
            TaskTrigger::on_updated(&review, &working),
            vec![TaskTrigger::ReviewRejected]
        );
        // Completing without review is not a review approval
        assert!(TaskTrigger::on_updated(&working, &done).is_empty());
    }

    #[test]
    fn test_reassignment_combines_with_status_change() {
        let before = with_status(TaskStatus::InProgress);
        let mut after = with_status(TaskStatus::Rejected);
        after.assigned_to = "u2".to_string();

        assert_eq!(
            TaskTrigger::on_updated(&before, &after),
            vec![TaskTrigger::Rejected, TaskTrigger::Reassigned]
        );
    }

    #[test]
    fn test_unknown_status_never_matches() {
        let before = with_status(TaskStatus::PendingReview);
        let after = with_status(TaskStatus::Unknown);
        assert!(TaskTrigger::on_updated(&before, &after).is_empty());
    }

    #[test]
    fn test_audience() {
        assert_eq!(TaskTrigger::ReviewSubmitted.audience(), Audience::Admins);
        assert_eq!(TaskTrigger::Reassigned.audience(), Audience::Assignee);
    }

    #[test]
    fn test_assigned_payload() {
        let mut t = task("t1", "u1");
        t.title = "Paint".to_string();
        t.priority = Some("high".to_string());

        let payload = TaskTrigger::Assigned.build_payload(&t, Some("Marta"));

        assert!(payload.title.contains("New task assigned"));
        assert_eq!(payload.body, "Marta assigned you: \"Paint\"");
        assert_eq!(payload.data["taskId"], "t1");
        assert_eq!(payload.data["type"], "task_assigned");
        assert_eq!(payload.data["priority"], "high");
    }

    #[test]
    fn test_payload_defaults() {
        let t = task("t1", "u1");

        let assigned = TaskTrigger::Reassigned.build_payload(&t, None);
        assert!(assigned.body.starts_with("Admin reassigned"));
        assert_eq!(assigned.data["priority"], "medium");

        let rejected = TaskTrigger::Rejected.build_payload(&t, None);
        assert_eq!(rejected.data["reviewComment"], "No comments");

        let approved = TaskTrigger::Approved.build_payload(&t, None);
        assert_eq!(approved.data["reviewComment"], "");

        let submitted = TaskTrigger::ReviewSubmitted.build_payload(&t, None);
        assert!(submitted.body.starts_with("A user submitted"));
        assert!(!submitted.data.contains_key("priority"));
    }
}
