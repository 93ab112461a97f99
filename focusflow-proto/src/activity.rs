//! Append-only activity records describing task and sharing events.

use serde::{Deserialize, Serialize};

use crate::ids::{ActivityId, TaskId, Timestamp, UserId};

/// Kind of event an [`ActivityRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// A task was created.
    Create,
    /// A task or share was modified (including permission changes).
    Update,
    /// A task was deleted.
    Delete,
    /// A share was created (or re-issued).
    Share,
    /// A share was revoked.
    Unshare,
    /// An invitation was accepted or rejected.
    StatusChange,
    /// A comment was posted.
    Comment,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Share => "share",
            Self::Unshare => "unshare",
            Self::StatusChange => "status_change",
            Self::Comment => "comment",
        };
        f.write_str(name)
    }
}

/// An immutable fact about a task's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Unique record identifier.
    pub id: ActivityId,
    /// The task the event concerns.
    pub task_id: TaskId,
    /// Who caused the event.
    pub actor_id: UserId,
    /// Event kind.
    pub activity_type: ActivityType,
    /// Free-form structured details (old/new values, grantee, ...).
    pub payload: serde_json::Value,
    /// When the record was created.
    pub created_at: Timestamp,
}

impl ActivityRecord {
    /// Creates a new record stamped with the current time.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        actor_id: UserId,
        activity_type: ActivityType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: ActivityId::new(),
            task_id,
            actor_id,
            activity_type,
            payload,
            created_at: Timestamp::now(),
        }
    }
}
