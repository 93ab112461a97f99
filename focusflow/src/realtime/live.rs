//! Live projections: a query, a subscription, and a [`Reconciler`].
//!
//! Lifecycle:
//! 1. [`LiveView::open`] subscribes first and fetches second, so nothing
//!    committed in between is lost (the overlap is absorbed by dedup).
//! 2. [`LiveView::pump`] / [`LiveView::sync`] apply feed items.
//! 3. A [`FeedItem::Gap`] triggers a full refetch before further increments.
//! 4. When the feed drops, the view reports [`LiveUpdate::Disconnected`] and
//!    stays stale until [`LiveView::resume`] re-subscribes and refetches.
//! 5. [`LiveView::close`] tears the subscription down; the view's owner must
//!    call it (or drop the view) when the screen that created it goes away.

use std::future::Future;
use std::sync::Arc;

use focusflow_proto::activity::ActivityRecord;
use focusflow_proto::chat::ChatMessage;
use focusflow_proto::feed::{FeedFilter, RowFilter, Table};
use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::share::Share;
use tokio::sync::watch;

use super::subscription::{FeedItem, Subscription};
use super::{Reconcilable, Reconciled, Reconciler};
use crate::backend::{ActivityStore, BackendError, ChangeFeed, ChatStore, ShareStore};

/// The query side of a live view: what to subscribe to and how to refetch.
pub trait LiveSource: Send + Sync {
    /// Row type of the projection.
    type Item: Reconcilable;

    /// Subscription filter matching exactly the rows [`load`](Self::load) returns.
    fn filter(&self) -> FeedFilter;

    /// Fetches the full current state.
    fn load(&self) -> impl Future<Output = Result<Vec<Self::Item>, BackendError>> + Send;
}

/// Outcome of one [`LiveView::pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveUpdate {
    /// One notification was applied.
    Applied(Reconciled),
    /// State was refetched after a gap.
    Refetched,
    /// The feed is gone; call [`LiveView::resume`].
    Disconnected,
}

/// A projection kept current by a change feed.
pub struct LiveView<S: LiveSource> {
    source: S,
    reconciler: Reconciler<S::Item>,
    subscription: Option<Subscription>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S: LiveSource> LiveView<S> {
    /// Subscribes to `feed` and loads the initial state.
    ///
    /// When `shutdown` is given, the view's subscriptions end as soon as
    /// the signal fires (see [`crate::session::Session::logout`]).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the initial fetch fails.
    pub async fn open<F: ChangeFeed>(
        feed: &F,
        source: S,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<Self, BackendError> {
        Self::open_with(feed, source, shutdown, super::DEFAULT_MAX_DEDUP_TRACKING).await
    }

    /// Like [`open`](Self::open), with a custom tombstone cap.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the initial fetch fails.
    pub async fn open_with<F: ChangeFeed>(
        feed: &F,
        source: S,
        shutdown: Option<watch::Receiver<bool>>,
        max_tracking: usize,
    ) -> Result<Self, BackendError> {
        let mut view = Self {
            source,
            reconciler: Reconciler::with_max_tracking(max_tracking),
            subscription: None,
            shutdown,
        };
        view.resume(feed).await?;
        Ok(view)
    }

    /// Current projection.
    #[must_use]
    pub fn items(&self) -> &[S::Item] {
        self.reconciler.items()
    }

    /// The query this view follows.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Whether the view is attached to a live subscription.
    pub fn is_live(&mut self) -> bool {
        self.subscription.as_mut().is_some_and(|s| !s.is_closed())
    }

    /// Waits for the next feed item and applies it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a gap refetch fails; the view keeps its
    /// previous state and remains subscribed.
    pub async fn pump(&mut self) -> Result<LiveUpdate, BackendError> {
        let next = match self.subscription.as_mut() {
            Some(sub) => sub.next().await,
            None => None,
        };
        self.handle(next).await
    }

    /// Applies every feed item that is already buffered, without waiting.
    ///
    /// Returns how many notifications changed the projection (a refetch
    /// counts as one).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if a gap refetch fails.
    pub async fn sync(&mut self) -> Result<usize, BackendError> {
        let mut changed = 0;
        loop {
            let next = match self.subscription.as_mut() {
                Some(sub) => sub.try_next(),
                None => return Ok(changed),
            };
            if next.is_none() && !self.is_live() {
                self.handle(None).await?;
                return Ok(changed);
            }
            let Some(item) = next else {
                return Ok(changed);
            };
            match self.handle(Some(item)).await? {
                LiveUpdate::Applied(r) if r.changed() => changed += 1,
                LiveUpdate::Refetched => changed += 1,
                LiveUpdate::Applied(_) | LiveUpdate::Disconnected => {}
            }
        }
    }

    /// Re-subscribes and refetches full state.
    ///
    /// Used after a dropped feed: increments are only applied again once
    /// the projection has been rebuilt from a fresh fetch.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the fetch fails; the view then stays
    /// subscribed with its previous (stale) state.
    pub async fn resume<F: ChangeFeed>(&mut self, feed: &F) -> Result<(), BackendError> {
        let mut sub = feed.subscribe(self.source.filter());
        if let Some(shutdown) = &self.shutdown {
            sub = sub.bind(shutdown.clone());
        }
        self.subscription = Some(sub);
        self.refetch().await
    }

    /// Unsubscribes. The projection keeps its last state.
    pub fn close(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
    }

    async fn refetch(&mut self) -> Result<(), BackendError> {
        let items = self.source.load().await?;
        tracing::debug!(count = items.len(), "live view refetched");
        self.reconciler.replace_all(items);
        Ok(())
    }

    async fn handle(&mut self, next: Option<FeedItem>) -> Result<LiveUpdate, BackendError> {
        match next {
            Some(FeedItem::Change(event)) => Ok(LiveUpdate::Applied(self.reconciler.apply(event))),
            Some(FeedItem::Gap { missed }) => {
                tracing::debug!(missed, "gap in change feed, refetching");
                self.refetch().await?;
                Ok(LiveUpdate::Refetched)
            }
            None => {
                if self.subscription.take().is_some() {
                    tracing::info!("change feed dropped, live view is stale until resumed");
                }
                Ok(LiveUpdate::Disconnected)
            }
        }
    }
}

impl<S: LiveSource> Drop for LiveView<S> {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Every share granted to one user, whatever its status.
pub struct GranteeShares<B> {
    backend: Arc<B>,
    grantee: UserId,
}

impl<B> GranteeShares<B> {
    /// Follows the shares granted to `grantee`.
    pub const fn new(backend: Arc<B>, grantee: UserId) -> Self {
        Self { backend, grantee }
    }
}

impl<B: ShareStore> LiveSource for GranteeShares<B> {
    type Item = Share;

    fn filter(&self) -> FeedFilter {
        FeedFilter::table(Table::Shares).rows(RowFilter::Grantee(self.grantee))
    }

    async fn load(&self) -> Result<Vec<Share>, BackendError> {
        self.backend.shares_for_grantee(&self.grantee, None).await
    }
}

/// Every share of one task (the owner's collaborator list).
pub struct TaskShares<B> {
    backend: Arc<B>,
    task_id: TaskId,
}

impl<B> TaskShares<B> {
    /// Follows the shares of `task_id`.
    pub const fn new(backend: Arc<B>, task_id: TaskId) -> Self {
        Self { backend, task_id }
    }
}

impl<B: ShareStore> LiveSource for TaskShares<B> {
    type Item = Share;

    fn filter(&self) -> FeedFilter {
        FeedFilter::table(Table::Shares).rows(RowFilter::Task(self.task_id))
    }

    async fn load(&self) -> Result<Vec<Share>, BackendError> {
        self.backend.shares_for_task(&self.task_id).await
    }
}

/// A task's assistant transcript.
pub struct TaskTranscript<B> {
    backend: Arc<B>,
    task_id: TaskId,
}

impl<B> TaskTranscript<B> {
    /// Follows the chat messages of `task_id`.
    pub const fn new(backend: Arc<B>, task_id: TaskId) -> Self {
        Self { backend, task_id }
    }
}

impl<B: ChatStore> LiveSource for TaskTranscript<B> {
    type Item = ChatMessage;

    fn filter(&self) -> FeedFilter {
        FeedFilter::table(Table::ChatMessages).rows(RowFilter::Task(self.task_id))
    }

    async fn load(&self) -> Result<Vec<ChatMessage>, BackendError> {
        self.backend.messages_for_task(&self.task_id).await
    }
}

/// A task's activity log.
pub struct TaskActivity<B> {
    backend: Arc<B>,
    task_id: TaskId,
}

impl<B> TaskActivity<B> {
    /// Follows the activity records of `task_id`.
    pub const fn new(backend: Arc<B>, task_id: TaskId) -> Self {
        Self { backend, task_id }
    }
}

impl<B: ActivityStore> LiveSource for TaskActivity<B> {
    type Item = ActivityRecord;

    fn filter(&self) -> FeedFilter {
        FeedFilter::table(Table::Activity).rows(RowFilter::Task(self.task_id))
    }

    async fn load(&self) -> Result<Vec<ActivityRecord>, BackendError> {
        self.backend.activity_for_task(&self.task_id).await
    }
}
