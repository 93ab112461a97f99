//! Contracts the sharing core consumes from its hosting backend.
//!
//! The core never talks to a database or a push service directly. It is
//! generic over these traits, so the same ledger and views run against the
//! in-process [`memory::MemoryBackend`] used by tests and the server, or any
//! other implementation that honours the same shape:
//!
//! - [`Directory`]: e-mail to user lookup.
//! - [`TaskStore`], [`ShareStore`], [`ActivityStore`], [`ChatStore`]: the
//!   relational collections.
//! - [`ChangeFeed`]: at-least-once row change notifications.
//!
//! Every store call is a suspension point; none of them retries on its own.

pub mod memory;

use std::future::Future;

use focusflow_proto::activity::ActivityRecord;
use focusflow_proto::chat::ChatMessage;
use focusflow_proto::feed::FeedFilter;
use focusflow_proto::ids::{ShareId, TaskId, UserId};
use focusflow_proto::share::{Share, ShareStatus};
use focusflow_proto::task::Task;
use focusflow_proto::user::UserProfile;

use crate::realtime::Subscription;

/// Errors that can occur in a backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or is overloaded.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// A uniqueness constraint rejected the write.
    #[error("duplicate: {0}")]
    Duplicate(String),
}

/// Registered-user directory.
pub trait Directory: Send + Sync {
    /// Returns every user whose e-mail equals `email` exactly.
    ///
    /// Zero or one result is expected; callers decide what more means.
    fn find_users_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Vec<UserProfile>, BackendError>> + Send;

    /// Looks up a profile by id.
    fn get_profile(
        &self,
        id: &UserId,
    ) -> impl Future<Output = Result<Option<UserProfile>, BackendError>> + Send;
}

/// Task collection.
pub trait TaskStore: Send + Sync {
    /// Inserts a new task row.
    fn insert_task(&self, task: &Task) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Fetches a task by id.
    fn get_task(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<Task>, BackendError>> + Send;

    /// Replaces a task row. Returns `false` if no such row exists.
    fn update_task(&self, task: &Task) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Deletes a task row and every share of it.
    ///
    /// Returns the task and the removed shares if the task existed.
    fn delete_task(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<(Task, Vec<Share>)>, BackendError>> + Send;

    /// All tasks owned by `owner`, oldest first.
    fn tasks_for_owner(
        &self,
        owner: &UserId,
    ) -> impl Future<Output = Result<Vec<Task>, BackendError>> + Send;

    /// The tasks among `ids` that exist, in the order given.
    fn tasks_by_ids(
        &self,
        ids: &[TaskId],
    ) -> impl Future<Output = Result<Vec<Task>, BackendError>> + Send;
}

/// Share collection. At most one row per `(task_id, grantee_id)`.
pub trait ShareStore: Send + Sync {
    /// Inserts `share`, or, if a row for the same `(task_id, grantee_id)`
    /// exists, overwrites its permission, status and `updated_at` while
    /// keeping the existing id and `created_at`. Returns the stored row.
    fn upsert_share(&self, share: &Share)
    -> impl Future<Output = Result<Share, BackendError>> + Send;

    /// Fetches a share by id.
    fn get_share(
        &self,
        id: &ShareId,
    ) -> impl Future<Output = Result<Option<Share>, BackendError>> + Send;

    /// Fetches the share for a `(task, grantee)` pair.
    fn find_share(
        &self,
        task_id: &TaskId,
        grantee_id: &UserId,
    ) -> impl Future<Output = Result<Option<Share>, BackendError>> + Send;

    /// All shares of a task, in insertion order.
    fn shares_for_task(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Vec<Share>, BackendError>> + Send;

    /// Shares granted to `grantee`, optionally restricted to one status.
    fn shares_for_grantee(
        &self,
        grantee_id: &UserId,
        status: Option<ShareStatus>,
    ) -> impl Future<Output = Result<Vec<Share>, BackendError>> + Send;

    /// Shares created by `owner`.
    fn shares_for_owner(
        &self,
        owner_id: &UserId,
    ) -> impl Future<Output = Result<Vec<Share>, BackendError>> + Send;

    /// Replaces a share row by id. Returns `false` if no such row exists.
    fn update_share(&self, share: &Share) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Compare-and-set on a share's status.
    ///
    /// Succeeds only while the row still exists, still belongs to `grantee_id`
    /// and is still in `from`; returns the updated row, or `None` if any of
    /// those conditions no longer holds.
    fn transition_share(
        &self,
        id: &ShareId,
        grantee_id: &UserId,
        from: ShareStatus,
        to: ShareStatus,
    ) -> impl Future<Output = Result<Option<Share>, BackendError>> + Send;

    /// Deletes the share for a `(task, grantee)` pair, returning it if it existed.
    fn delete_share(
        &self,
        task_id: &TaskId,
        grantee_id: &UserId,
    ) -> impl Future<Output = Result<Option<Share>, BackendError>> + Send;
}

/// Append-only activity log.
pub trait ActivityStore: Send + Sync {
    /// Appends one record.
    fn append_activity(
        &self,
        record: &ActivityRecord,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Records for a task, oldest first.
    fn activity_for_task(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Vec<ActivityRecord>, BackendError>> + Send;
}

/// Task chat transcripts.
pub trait ChatStore: Send + Sync {
    /// Stores one message.
    fn insert_message(
        &self,
        message: &ChatMessage,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Messages for a task, oldest first.
    fn messages_for_task(
        &self,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, BackendError>> + Send;
}

/// Row change notifications.
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription. Changes committed after this call are delivered.
    fn subscribe(&self, filter: FeedFilter) -> Subscription;
}

/// Everything the sharing core needs from its host.
pub trait Backend:
    Directory + TaskStore + ShareStore + ActivityStore + ChatStore + ChangeFeed
{
}

impl<T> Backend for T where
    T: Directory + TaskStore + ShareStore + ActivityStore + ChatStore + ChangeFeed
{
}
