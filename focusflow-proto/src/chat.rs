//! Per-task assistant chat transcript entries.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, TaskId, Timestamp, UserId};

/// Maximum chat message length in bytes.
pub const MAX_CHAT_MESSAGE_SIZE: usize = 8 * 1024;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// A human participant.
    User,
    /// The text-generation service.
    Assistant,
}

/// One entry in a task's chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// The task this conversation is about.
    pub task_id: TaskId,
    /// The user who asked (also recorded on assistant replies).
    pub user_id: UserId,
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// When the message was stored.
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// Creates a new message stamped with the current time.
    pub fn new(task_id: TaskId, user_id: UserId, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            task_id,
            user_id,
            role,
            content: content.into(),
            created_at: Timestamp::now(),
        }
    }
}
