//! The signed-in user's context.
//!
//! A [`Session`] is created on login and torn down on logout. It carries the
//! user's identity and display preferences, owns their [`SharingViews`], and
//! hands out live views that are bound to its lifetime: when the session
//! ends, every subscription opened through it ends too.

use std::sync::Arc;

use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::user::UserProfile;
use tokio::sync::watch;

use crate::backend::{Backend, BackendError};
use crate::realtime::{
    GranteeShares, LiveSource, LiveView, TaskActivity, TaskShares, TaskTranscript,
};
use crate::sharing::{AccessEvaluator, SharingError, SharingViews};

/// Per-user display preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preferences {
    /// Dark colour scheme.
    pub dark_mode: bool,
}

/// A signed-in user.
pub struct Session<B> {
    user: UserProfile,
    preferences: parking_lot::Mutex<Preferences>,
    backend: Arc<B>,
    views: SharingViews<B>,
    max_tracking: usize,
    shutdown: watch::Sender<bool>,
}

impl<B: Backend> Session<B> {
    /// Starts a session for `user`. Usually called through
    /// [`crate::app::App::login`].
    pub fn new(user: UserProfile, backend: Arc<B>, views: SharingViews<B>, max_tracking: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        tracing::info!(user_id = %user.id, "session started");
        Self {
            user,
            preferences: parking_lot::Mutex::new(Preferences::default()),
            backend,
            views,
            max_tracking,
            shutdown,
        }
    }

    /// The signed-in user's profile.
    #[must_use]
    pub const fn user(&self) -> &UserProfile {
        &self.user
    }

    /// The signed-in user's id.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user.id
    }

    /// Current display preferences.
    #[must_use]
    pub fn preferences(&self) -> Preferences {
        *self.preferences.lock()
    }

    /// Switches the colour scheme.
    pub fn set_dark_mode(&self, enabled: bool) {
        self.preferences.lock().dark_mode = enabled;
    }

    /// Pending invitations, shared-with-me and the owner panel for this user.
    #[must_use]
    pub const fn views(&self) -> &SharingViews<B> {
        &self.views
    }

    /// Whether the session is still signed in.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Opens a live view whose subscription ends with this session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the initial fetch fails.
    pub async fn open_live<S: LiveSource>(&self, source: S) -> Result<LiveView<S>, BackendError> {
        LiveView::open_with(
            self.backend.as_ref(),
            source,
            Some(self.shutdown.subscribe()),
            self.max_tracking,
        )
        .await
    }

    /// Follows every share granted to this user.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] if the initial fetch fails.
    pub async fn watch_my_shares(&self) -> Result<LiveView<GranteeShares<B>>, SharingError> {
        let source = GranteeShares::new(Arc::clone(&self.backend), self.user.id);
        Ok(self.open_live(source).await?)
    }

    /// Follows the collaborator list of a task this user owns.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] / [`SharingError::Forbidden`] unless the
    /// user owns the task; [`SharingError::Transient`] on store failure.
    pub async fn watch_task_shares(
        &self,
        task_id: TaskId,
    ) -> Result<LiveView<TaskShares<B>>, SharingError> {
        self.access().require_owner(task_id, self.user.id).await?;
        let source = TaskShares::new(Arc::clone(&self.backend), task_id);
        Ok(self.open_live(source).await?)
    }

    /// Follows a task's assistant transcript. Needs chat access.
    ///
    /// # Errors
    ///
    /// [`SharingError::Forbidden`] below `admin`, otherwise as above.
    pub async fn watch_transcript(
        &self,
        task_id: TaskId,
    ) -> Result<LiveView<TaskTranscript<B>>, SharingError> {
        self.access().require_chat(task_id, self.user.id).await?;
        let source = TaskTranscript::new(Arc::clone(&self.backend), task_id);
        Ok(self.open_live(source).await?)
    }

    /// Follows a task's activity log. Needs view access.
    ///
    /// # Errors
    ///
    /// [`SharingError::Forbidden`] without access, otherwise as above.
    pub async fn watch_activity(
        &self,
        task_id: TaskId,
    ) -> Result<LiveView<TaskActivity<B>>, SharingError> {
        self.access().require_view(task_id, self.user.id).await?;
        let source = TaskActivity::new(Arc::clone(&self.backend), task_id);
        Ok(self.open_live(source).await?)
    }

    /// Signs out, ending every subscription opened through this session.
    pub fn logout(self) {
        drop(self);
    }

    fn access(&self) -> AccessEvaluator<B> {
        AccessEvaluator::new(Arc::clone(&self.backend))
    }
}

impl<B> Drop for Session<B> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        tracing::info!(user_id = %self.user.id, "session ended");
    }
}
