//! Cancellable change-feed subscription handle.

use focusflow_proto::feed::{ChangeEvent, FeedFilter};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

/// One item read from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// A change matching the subscription's filter.
    Change(ChangeEvent),
    /// The subscriber fell behind and `missed` notifications were dropped.
    /// The consumer must refetch full state.
    Gap {
        /// Number of notifications lost.
        missed: u64,
    },
}

/// A live subscription to a change feed.
///
/// The handle yields the changes that match its [`FeedFilter`]. It ends
/// (`None`) when the feed is dropped, when [`unsubscribe`](Self::unsubscribe)
/// is called, or when the shutdown signal it is bound to fires. Dropping the
/// handle releases the underlying receiver.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: FeedFilter,
    shutdown: Option<watch::Receiver<bool>>,
    closed: bool,
}

impl Subscription {
    /// Wraps a broadcast receiver with a filter.
    #[must_use]
    pub const fn new(rx: broadcast::Receiver<ChangeEvent>, filter: FeedFilter) -> Self {
        Self {
            rx,
            filter,
            shutdown: None,
            closed: false,
        }
    }

    /// Ties this subscription to a shutdown signal: once the signal reads
    /// `true` (or its sender is dropped) the subscription ends.
    #[must_use]
    pub fn bind(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The filter this subscription was opened with.
    #[must_use]
    pub const fn filter(&self) -> &FeedFilter {
        &self.filter
    }

    /// Whether the subscription has ended.
    #[must_use]
    pub fn is_closed(&mut self) -> bool {
        if self.shutdown_signalled() {
            self.closed = true;
        }
        self.closed
    }

    /// Waits for the next matching item. Returns `None` once the
    /// subscription has ended.
    pub async fn next(&mut self) -> Option<FeedItem> {
        loop {
            if self.is_closed() {
                return None;
            }
            let received = match self.shutdown.as_mut() {
                Some(shutdown) => {
                    tokio::select! {
                        r = self.rx.recv() => r,
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                self.closed = true;
                            }
                            continue;
                        }
                    }
                }
                None => self.rx.recv().await,
            };
            if let Some(item) = self.accept(received) {
                return Some(item);
            }
        }
    }

    /// Returns the next matching item that is already buffered, without
    /// waiting.
    pub fn try_next(&mut self) -> Option<FeedItem> {
        loop {
            if self.is_closed() {
                return None;
            }
            let received = match self.rx.try_recv() {
                Ok(event) => Ok(event),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => Err(RecvError::Lagged(n)),
                Err(TryRecvError::Closed) => Err(RecvError::Closed),
            };
            if let Some(item) = self.accept(received) {
                return Some(item);
            }
        }
    }

    /// Ends the subscription explicitly.
    pub fn unsubscribe(mut self) {
        self.closed = true;
        tracing::debug!(table = ?self.filter.table, "subscription closed");
    }

    fn accept(&mut self, received: Result<ChangeEvent, RecvError>) -> Option<FeedItem> {
        match received {
            Ok(event) if self.filter.matches(&event) => Some(FeedItem::Change(event)),
            Ok(_) => None,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, table = ?self.filter.table, "subscriber lagged");
                Some(FeedItem::Gap { missed })
            }
            Err(RecvError::Closed) => {
                self.closed = true;
                None
            }
        }
    }

    fn shutdown_signalled(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| *s.borrow() || s.has_changed().is_err())
    }
}
