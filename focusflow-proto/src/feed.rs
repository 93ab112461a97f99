//! Change-feed vocabulary and websocket frames.
//!
//! A change feed delivers one [`ChangeEvent`] per row mutation. Delivery is
//! at-least-once: consumers must deduplicate. Deletes carry the removed row
//! so a projection can drop it by identity.
//!
//! Over the server's websocket the client sends one [`ClientFrame::Subscribe`]
//! and then receives [`ServerFrame`]s, all encoded as JSON text.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityRecord;
use crate::chat::ChatMessage;
use crate::ids::{TaskId, UserId};
use crate::share::Share;
use crate::task::Task;

/// Collections that publish changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Task rows.
    Tasks,
    /// Share rows.
    Shares,
    /// Activity records.
    Activity,
    /// Chat transcript entries.
    ChatMessages,
}

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// A row was inserted.
    Insert,
    /// A row was updated in place.
    Update,
    /// A row was deleted.
    Delete,
}

/// A typed row payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Row {
    /// A task row.
    Tasks(Task),
    /// A share row.
    Shares(Share),
    /// An activity record.
    Activity(ActivityRecord),
    /// A chat message.
    ChatMessages(ChatMessage),
}

impl Row {
    /// The collection this row belongs to.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Tasks(_) => Table::Tasks,
            Self::Shares(_) => Table::Shares,
            Self::Activity(_) => Table::Activity,
            Self::ChatMessages(_) => Table::ChatMessages,
        }
    }

    /// The task this row concerns.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Tasks(t) => t.id,
            Self::Shares(s) => s.task_id,
            Self::Activity(a) => a.task_id,
            Self::ChatMessages(m) => m.task_id,
        }
    }
}

/// One notification from the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub op: ChangeOp,
    /// The new row (or the removed row for deletes).
    #[serde(flatten)]
    pub row: Row,
}

impl ChangeEvent {
    /// Creates a change event.
    #[must_use]
    pub const fn new(op: ChangeOp, row: Row) -> Self {
        Self { op, row }
    }
}

/// Row-level predicate for a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RowFilter {
    /// Every row of the table.
    #[default]
    All,
    /// Rows concerning one task.
    Task(TaskId),
    /// Shares granted to this user.
    Grantee(UserId),
    /// Tasks or shares owned by this user.
    Owner(UserId),
    /// Shares this user is either owner or grantee of.
    Party(UserId),
}

impl RowFilter {
    /// Whether `row` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match (self, row) {
            (Self::All, _) => true,
            (Self::Task(id), row) => row.task_id() == *id,
            (Self::Grantee(user), Row::Shares(s)) => s.grantee_id == *user,
            (Self::Owner(user), Row::Shares(s)) => s.owner_id == *user,
            (Self::Owner(user), Row::Tasks(t)) => t.owner_id == *user,
            (Self::Party(user), Row::Shares(s)) => s.owner_id == *user || s.grantee_id == *user,
            _ => false,
        }
    }
}

/// Subscription request: which table, which operations, which rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    /// Table to follow.
    pub table: Table,
    /// Operations of interest; empty means all.
    #[serde(default)]
    pub ops: Vec<ChangeOp>,
    /// Row predicate.
    #[serde(default)]
    pub rows: RowFilter,
}

impl FeedFilter {
    /// Follows every change to `table`.
    #[must_use]
    pub const fn table(table: Table) -> Self {
        Self {
            table,
            ops: Vec::new(),
            rows: RowFilter::All,
        }
    }

    /// Restricts the row predicate.
    #[must_use]
    pub const fn rows(mut self, rows: RowFilter) -> Self {
        self.rows = rows;
        self
    }

    /// Restricts the operations of interest.
    #[must_use]
    pub fn ops(mut self, ops: &[ChangeOp]) -> Self {
        self.ops = ops.to_vec();
        self
    }

    /// Whether `event` should be delivered to this subscription.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.row.table() == self.table
            && (self.ops.is_empty() || self.ops.contains(&event.op))
            && self.rows.matches(&event.row)
    }
}

/// Frames sent by a feed client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start (or replace) the connection's subscription.
    Subscribe {
        /// What to follow.
        filter: FeedFilter,
    },
    /// Stop receiving changes without closing the socket.
    Unsubscribe,
}

/// Frames sent by the feed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The subscription is live; changes after this frame are delivered.
    Subscribed {
        /// The accepted filter.
        filter: FeedFilter,
    },
    /// A matching change.
    Change(ChangeEvent),
    /// Notifications were lost; the client must refetch full state.
    Gap {
        /// How many notifications were skipped.
        missed: u64,
    },
    /// The request was refused.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

/// Error produced when a frame cannot be encoded or decoded.
#[derive(Debug, thiserror::Error)]
#[error("feed frame codec error: {0}")]
pub struct FrameError(#[from] serde_json::Error);

/// Encodes a frame as JSON text.
///
/// # Errors
///
/// Returns [`FrameError`] if serialization fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, FrameError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a frame from JSON text.
///
/// # Errors
///
/// Returns [`FrameError`] if the text is not a valid frame.
pub fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, FrameError> {
    Ok(serde_json::from_str(text)?)
}
