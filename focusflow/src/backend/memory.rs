//! In-process backend: tables behind async locks plus a broadcast change feed.
//!
//! Every mutation publishes its [`ChangeEvent`] while the table's write lock
//! is still held, so subscribers observe changes in commit order. The feed is
//! a bounded [`broadcast`] channel; a subscriber that falls further behind
//! than the capacity sees a gap and must refetch.
//!
//! Two fault switches let tests exercise failure paths without a real
//! network: [`MemoryBackend::set_unavailable`] fails every call, and
//! [`MemoryBackend::fail_activity_writes`] fails only activity appends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use focusflow_proto::activity::ActivityRecord;
use focusflow_proto::chat::ChatMessage;
use focusflow_proto::feed::{ChangeEvent, ChangeOp, FeedFilter, Row};
use focusflow_proto::ids::{ShareId, TaskId, Timestamp, UserId};
use focusflow_proto::share::{Share, ShareStatus};
use focusflow_proto::task::Task;
use focusflow_proto::user::UserProfile;
use tokio::sync::{RwLock, broadcast};

use super::{
    ActivityStore, BackendError, ChangeFeed, ChatStore, Directory, ShareStore, TaskStore,
};
use crate::realtime::Subscription;

/// Default number of buffered notifications per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Backend that keeps everything in memory.
pub struct MemoryBackend {
    users: RwLock<HashMap<UserId, UserProfile>>,
    tasks: RwLock<Vec<Task>>,
    shares: RwLock<Vec<Share>>,
    activity: RwLock<Vec<ActivityRecord>>,
    chat: RwLock<Vec<ChatMessage>>,
    feed: parking_lot::Mutex<broadcast::Sender<ChangeEvent>>,
    feed_capacity: usize,
    unavailable: AtomicBool,
    fail_activity: AtomicBool,
    activity_delay_ms: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend with the default feed capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Creates an empty backend whose feed buffers `capacity` notifications.
    #[must_use]
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            users: RwLock::new(HashMap::new()),
            tasks: RwLock::new(Vec::new()),
            shares: RwLock::new(Vec::new()),
            activity: RwLock::new(Vec::new()),
            chat: RwLock::new(Vec::new()),
            feed: parking_lot::Mutex::new(tx),
            feed_capacity: capacity,
            unavailable: AtomicBool::new(false),
            fail_activity: AtomicBool::new(false),
            activity_delay_ms: AtomicU64::new(0),
        }
    }

    /// Registers a user. E-mail addresses are unique.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Duplicate`] if the e-mail is already taken.
    pub async fn register_user(
        &self,
        email: &str,
        name: Option<String>,
    ) -> Result<UserProfile, BackendError> {
        self.check()?;
        let email = email.trim();
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(BackendError::Duplicate(format!("email {email}")));
        }
        let profile = UserProfile::new(email, name);
        users.insert(profile.id, profile.clone());
        drop(users);
        tracing::debug!(user_id = %profile.id, "user registered");
        Ok(profile)
    }

    /// Makes every subsequent call fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes activity appends fail with [`BackendError::WriteFailed`].
    pub fn fail_activity_writes(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    /// Holds every activity append for `delay` before it is written.
    pub fn delay_activity_writes(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.activity_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Disconnects every current subscriber, as a push-service outage would.
    ///
    /// Open subscriptions end; new ones attach to a fresh feed.
    pub fn drop_feed(&self) {
        let (tx, _) = broadcast::channel(self.feed_capacity);
        let old = std::mem::replace(&mut *self.feed.lock(), tx);
        tracing::info!(subscribers = old.receiver_count(), "change feed dropped");
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.feed.lock().receiver_count()
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        Ok(())
    }

    fn publish(&self, op: ChangeOp, row: Row) {
        // No subscribers is not an error.
        let _ = self.feed.lock().send(ChangeEvent::new(op, row));
    }
}

impl Directory for MemoryBackend {
    async fn find_users_by_email(&self, email: &str) -> Result<Vec<UserProfile>, BackendError> {
        self.check()?;
        let users = self.users.read().await;
        Ok(users.values().filter(|u| u.email == email).cloned().collect())
    }

    async fn get_profile(&self, id: &UserId) -> Result<Option<UserProfile>, BackendError> {
        self.check()?;
        Ok(self.users.read().await.get(id).cloned())
    }
}

impl TaskStore for MemoryBackend {
    async fn insert_task(&self, task: &Task) -> Result<(), BackendError> {
        self.check()?;
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(BackendError::Duplicate(format!("task {}", task.id)));
        }
        tasks.push(task.clone());
        self.publish(ChangeOp::Insert, Row::Tasks(task.clone()));
        drop(tasks);
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, BackendError> {
        self.check()?;
        Ok(self.tasks.read().await.iter().find(|t| t.id == *id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<bool, BackendError> {
        self.check()?;
        let mut tasks = self.tasks.write().await;
        let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) else {
            return Ok(false);
        };
        *slot = task.clone();
        self.publish(ChangeOp::Update, Row::Tasks(task.clone()));
        drop(tasks);
        Ok(true)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<Option<(Task, Vec<Share>)>, BackendError> {
        self.check()?;
        let mut tasks = self.tasks.write().await;
        let Some(idx) = tasks.iter().position(|t| t.id == *id) else {
            return Ok(None);
        };
        let task = tasks.remove(idx);

        // Shares cannot outlive their task.
        let mut shares = self.shares.write().await;
        let (gone, kept): (Vec<Share>, Vec<Share>) =
            shares.drain(..).partition(|s| s.task_id == *id);
        *shares = kept;
        for share in &gone {
            self.publish(ChangeOp::Delete, Row::Shares(share.clone()));
        }
        drop(shares);

        self.publish(ChangeOp::Delete, Row::Tasks(task.clone()));
        drop(tasks);
        Ok(Some((task, gone)))
    }

    async fn tasks_for_owner(&self, owner: &UserId) -> Result<Vec<Task>, BackendError> {
        self.check()?;
        let tasks = self.tasks.read().await;
        Ok(tasks.iter().filter(|t| t.owner_id == *owner).cloned().collect())
    }

    async fn tasks_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>, BackendError> {
        self.check()?;
        let tasks = self.tasks.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tasks.iter().find(|t| t.id == *id).cloned())
            .collect())
    }
}

impl ShareStore for MemoryBackend {
    async fn upsert_share(&self, share: &Share) -> Result<Share, BackendError> {
        self.check()?;
        let mut shares = self.shares.write().await;
        let existing = shares
            .iter_mut()
            .find(|s| s.task_id == share.task_id && s.grantee_id == share.grantee_id);
        let (op, stored) = if let Some(row) = existing {
            row.permission = share.permission;
            row.status = share.status;
            row.updated_at = share.updated_at;
            (ChangeOp::Update, row.clone())
        } else {
            shares.push(share.clone());
            (ChangeOp::Insert, share.clone())
        };
        self.publish(op, Row::Shares(stored.clone()));
        drop(shares);
        Ok(stored)
    }

    async fn get_share(&self, id: &ShareId) -> Result<Option<Share>, BackendError> {
        self.check()?;
        Ok(self.shares.read().await.iter().find(|s| s.id == *id).cloned())
    }

    async fn find_share(
        &self,
        task_id: &TaskId,
        grantee_id: &UserId,
    ) -> Result<Option<Share>, BackendError> {
        self.check()?;
        let shares = self.shares.read().await;
        Ok(shares
            .iter()
            .find(|s| s.task_id == *task_id && s.grantee_id == *grantee_id)
            .cloned())
    }

    async fn shares_for_task(&self, task_id: &TaskId) -> Result<Vec<Share>, BackendError> {
        self.check()?;
        let shares = self.shares.read().await;
        Ok(shares.iter().filter(|s| s.task_id == *task_id).cloned().collect())
    }

    async fn shares_for_grantee(
        &self,
        grantee_id: &UserId,
        status: Option<ShareStatus>,
    ) -> Result<Vec<Share>, BackendError> {
        self.check()?;
        let shares = self.shares.read().await;
        Ok(shares
            .iter()
            .filter(|s| s.grantee_id == *grantee_id && status.is_none_or(|st| s.status == st))
            .cloned()
            .collect())
    }

    async fn shares_for_owner(&self, owner_id: &UserId) -> Result<Vec<Share>, BackendError> {
        self.check()?;
        let shares = self.shares.read().await;
        Ok(shares.iter().filter(|s| s.owner_id == *owner_id).cloned().collect())
    }

    async fn update_share(&self, share: &Share) -> Result<bool, BackendError> {
        self.check()?;
        let mut shares = self.shares.write().await;
        let Some(slot) = shares.iter_mut().find(|s| s.id == share.id) else {
            return Ok(false);
        };
        *slot = share.clone();
        self.publish(ChangeOp::Update, Row::Shares(share.clone()));
        drop(shares);
        Ok(true)
    }

    async fn transition_share(
        &self,
        id: &ShareId,
        grantee_id: &UserId,
        from: ShareStatus,
        to: ShareStatus,
    ) -> Result<Option<Share>, BackendError> {
        self.check()?;
        let mut shares = self.shares.write().await;
        let Some(slot) = shares
            .iter_mut()
            .find(|s| s.id == *id && s.grantee_id == *grantee_id && s.status == from)
        else {
            return Ok(None);
        };
        slot.status = to;
        slot.updated_at = Timestamp::now();
        let updated = slot.clone();
        self.publish(ChangeOp::Update, Row::Shares(updated.clone()));
        drop(shares);
        Ok(Some(updated))
    }

    async fn delete_share(
        &self,
        task_id: &TaskId,
        grantee_id: &UserId,
    ) -> Result<Option<Share>, BackendError> {
        self.check()?;
        let mut shares = self.shares.write().await;
        let Some(idx) = shares
            .iter()
            .position(|s| s.task_id == *task_id && s.grantee_id == *grantee_id)
        else {
            return Ok(None);
        };
        let removed = shares.remove(idx);
        self.publish(ChangeOp::Delete, Row::Shares(removed.clone()));
        drop(shares);
        Ok(Some(removed))
    }
}

impl ActivityStore for MemoryBackend {
    async fn append_activity(&self, record: &ActivityRecord) -> Result<(), BackendError> {
        self.check()?;
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(BackendError::WriteFailed("activity log rejected write".to_string()));
        }
        let delay = self.activity_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let mut activity = self.activity.write().await;
        activity.push(record.clone());
        self.publish(ChangeOp::Insert, Row::Activity(record.clone()));
        drop(activity);
        Ok(())
    }

    async fn activity_for_task(&self, task_id: &TaskId) -> Result<Vec<ActivityRecord>, BackendError> {
        self.check()?;
        let activity = self.activity.read().await;
        Ok(activity.iter().filter(|a| a.task_id == *task_id).cloned().collect())
    }
}

impl ChatStore for MemoryBackend {
    async fn insert_message(&self, message: &ChatMessage) -> Result<(), BackendError> {
        self.check()?;
        let mut chat = self.chat.write().await;
        chat.push(message.clone());
        self.publish(ChangeOp::Insert, Row::ChatMessages(message.clone()));
        drop(chat);
        Ok(())
    }

    async fn messages_for_task(&self, task_id: &TaskId) -> Result<Vec<ChatMessage>, BackendError> {
        self.check()?;
        let chat = self.chat.read().await;
        Ok(chat.iter().filter(|m| m.task_id == *task_id).cloned().collect())
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe(&self, filter: FeedFilter) -> Subscription {
        let rx = self.feed.lock().subscribe();
        tracing::debug!(table = ?filter.table, "subscriber attached");
        Subscription::new(rx, filter)
    }
}
