//! Task model.
//!
//! A task is owned exclusively by its creator. Its existence does not depend
//! on any share; deleting a share never touches the task row.

use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, Timestamp, UserId};

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Priority of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Needs attention first.
    High,
    /// The default.
    #[default]
    Medium,
    /// Can wait.
    Low,
}

/// Category a task is filed under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Job-related work.
    Work,
    /// Personal errands.
    #[default]
    Personal,
    /// Study and learning.
    Study,
    /// Health and fitness.
    Health,
    /// Anything else.
    Other,
}

/// Progress state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Pending,
    /// Actively being worked on.
    InProgress,
    /// Done.
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// An owned unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// The creator, who owns the task for its whole life.
    pub owner_id: UserId,
    /// Short title shown in lists.
    pub title: String,
    /// Longer free-form description (may be empty).
    #[serde(default)]
    pub description: String,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Category.
    #[serde(default)]
    pub category: Category,
    /// Progress state.
    #[serde(default)]
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: Timestamp,
    /// When the task was last modified.
    pub updated_at: Timestamp,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    /// Optional start date.
    #[serde(default)]
    pub start_date: Option<Timestamp>,
}

/// Caller-supplied fields for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTask {
    /// Task title (required, validated).
    pub title: String,
    /// Description.
    pub description: String,
    /// Priority.
    pub priority: Priority,
    /// Category.
    pub category: Category,
    /// Optional due date.
    pub due_date: Option<Timestamp>,
    /// Optional start date.
    pub start_date: Option<Timestamp>,
}

impl NewTask {
    /// Creates a new-task request with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update of a task's descriptive fields. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New category.
    pub category: Option<Category>,
}

impl TaskPatch {
    /// Whether this patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.category.is_none()
    }
}

/// Error returned when a task title fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    /// Title is empty or whitespace.
    #[error("task title cannot be empty")]
    Empty,
    /// Title exceeds [`MAX_TASK_TITLE_LENGTH`] characters.
    #[error("task title too long (max {MAX_TASK_TITLE_LENGTH} characters)")]
    TooLong,
}

/// Validates a task title.
///
/// # Errors
///
/// Returns [`TitleError::Empty`] for a blank title and [`TitleError::TooLong`]
/// for one longer than [`MAX_TASK_TITLE_LENGTH`] characters.
pub fn validate_title(title: &str) -> Result<(), TitleError> {
    if title.trim().is_empty() {
        return Err(TitleError::Empty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(TitleError::TooLong);
    }
    Ok(())
}
