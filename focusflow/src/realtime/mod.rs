//! Realtime reconciliation of change-feed notifications into local state.
//!
//! The change feed delivers at-least-once, so the same notification can
//! arrive twice. A [`Reconciler`] keeps an ordered local projection keyed by
//! a [`DedupKey`]: the row's stable id when it has one, otherwise its
//! timestamp plus content. A notification whose key is already present has
//! no observable effect.
//!
//! Local actions never insert into a projection directly. The row shows up
//! when the feed echoes it back, so the projection and the feed cannot
//! disagree about what exists.
//!
//! [`LiveView`] ties a projection to a [`Subscription`] and owns the
//! gap-recovery rule: after lag or a dropped feed it refetches full state
//! before applying further increments.

pub mod live;
pub mod subscription;

use std::collections::HashSet;

use focusflow_proto::activity::ActivityRecord;
use focusflow_proto::chat::ChatMessage;
use focusflow_proto::feed::{ChangeEvent, ChangeOp, Row};
use focusflow_proto::ids::Timestamp;
use focusflow_proto::share::Share;
use focusflow_proto::task::Task;
use uuid::Uuid;

pub use live::{
    GranteeShares, LiveSource, LiveUpdate, LiveView, TaskActivity, TaskShares, TaskTranscript,
};
pub use subscription::{FeedItem, Subscription};

/// Default cap on remembered tombstones before the set is reset.
pub const DEFAULT_MAX_DEDUP_TRACKING: usize = 10_000;

/// Content identity for rows without a stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    /// When the row was created.
    pub timestamp: Timestamp,
    /// Concatenation of the fields that make two rows "the same".
    pub fields: String,
}

/// Key used to decide whether a notification is already reflected locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Stable row identifier.
    Id(Uuid),
    /// Timestamp plus content equality.
    Content(ContentKey),
}

/// A row type that can live in a [`Reconciler`] projection.
pub trait Reconcilable: Clone + PartialEq + Send + Sync + 'static {
    /// Stable identifier, when the row has one.
    fn stable_id(&self) -> Option<Uuid>;

    /// Content identity, used when there is no stable id.
    fn content_key(&self) -> ContentKey;

    /// Extracts this row type from a feed payload, if it is one.
    fn from_row(row: Row) -> Option<Self>;

    /// The key this row is deduplicated by.
    fn dedup_key(&self) -> DedupKey {
        self.stable_id()
            .map_or_else(|| DedupKey::Content(self.content_key()), DedupKey::Id)
    }
}

/// Effect of applying one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A new entry was appended.
    Inserted,
    /// An existing entry was replaced with different content.
    Updated,
    /// An entry was removed.
    Removed,
    /// The notification was already reflected; nothing changed.
    Duplicate,
    /// The notification did not concern this projection.
    Ignored,
}

impl Reconciled {
    /// Whether the projection changed and should be re-rendered.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Removed)
    }
}

/// Ordered, deduplicated local projection of a remote collection.
#[derive(Debug)]
pub struct Reconciler<T: Reconcilable> {
    items: Vec<T>,
    keys: HashSet<DedupKey>,
    /// Keys of removed rows, so a late redelivered insert stays dead.
    tombstones: HashSet<DedupKey>,
    max_tracking: usize,
}

impl<T: Reconcilable> Default for Reconciler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reconcilable> Reconciler<T> {
    /// Creates an empty projection with the default tracking cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_tracking(DEFAULT_MAX_DEDUP_TRACKING)
    }

    /// Creates an empty projection with a custom tombstone cap.
    #[must_use]
    pub fn with_max_tracking(max_tracking: usize) -> Self {
        Self {
            items: Vec::new(),
            keys: HashSet::new(),
            tombstones: HashSet::new(),
            max_tracking,
        }
    }

    /// Replaces the whole projection with freshly fetched state.
    ///
    /// Duplicate keys in `items` keep their first occurrence. Tombstones are
    /// cleared: a full fetch is authoritative.
    pub fn replace_all(&mut self, items: Vec<T>) {
        self.items.clear();
        self.keys.clear();
        self.tombstones.clear();
        for item in items {
            if self.keys.insert(item.dedup_key()) {
                self.items.push(item);
            }
        }
    }

    /// Applies one change notification.
    pub fn apply(&mut self, event: ChangeEvent) -> Reconciled {
        let Some(item) = T::from_row(event.row) else {
            return Reconciled::Ignored;
        };
        match event.op {
            ChangeOp::Insert => self.insert(item),
            ChangeOp::Update => self.upsert(item),
            ChangeOp::Delete => self.remove(&item),
        }
    }

    /// Appends `item` unless its key is already present.
    pub fn insert(&mut self, item: T) -> Reconciled {
        let key = item.dedup_key();
        if self.keys.contains(&key) || self.tombstones.contains(&key) {
            tracing::debug!(?key, "duplicate notification dropped");
            return Reconciled::Duplicate;
        }
        self.keys.insert(key);
        self.items.push(item);
        Reconciled::Inserted
    }

    /// Replaces the entry with the same key, or appends if absent.
    pub fn upsert(&mut self, item: T) -> Reconciled {
        let key = item.dedup_key();
        if self.tombstones.contains(&key) {
            return Reconciled::Duplicate;
        }
        match self.position(&key) {
            Some(idx) if self.items[idx] == item => Reconciled::Duplicate,
            Some(idx) => {
                self.items[idx] = item;
                Reconciled::Updated
            }
            None => {
                self.keys.insert(key);
                self.items.push(item);
                Reconciled::Inserted
            }
        }
    }

    /// Removes the entry with the same key as `item`.
    pub fn remove(&mut self, item: &T) -> Reconciled {
        let key = item.dedup_key();
        if self.tombstones.len() >= self.max_tracking {
            self.tombstones.clear();
        }
        self.tombstones.insert(key.clone());
        match self.position(&key) {
            Some(idx) => {
                self.items.remove(idx);
                self.keys.remove(&key);
                Reconciled::Removed
            }
            None => Reconciled::Duplicate,
        }
    }

    /// Current entries in arrival order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the projection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, key: &DedupKey) -> Option<usize> {
        if !self.keys.contains(key) {
            return None;
        }
        self.items.iter().position(|i| i.dedup_key() == *key)
    }
}

impl Reconcilable for Share {
    fn stable_id(&self) -> Option<Uuid> {
        Some(*self.id.as_uuid())
    }

    fn content_key(&self) -> ContentKey {
        ContentKey {
            timestamp: self.created_at,
            fields: format!("{}:{}", self.task_id, self.grantee_id),
        }
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Shares(s) => Some(s),
            _ => None,
        }
    }
}

impl Reconcilable for ChatMessage {
    fn stable_id(&self) -> Option<Uuid> {
        Some(*self.id.as_uuid())
    }

    fn content_key(&self) -> ContentKey {
        ContentKey {
            timestamp: self.created_at,
            fields: format!("{:?}:{}:{}", self.role, self.user_id, self.content),
        }
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::ChatMessages(m) => Some(m),
            _ => None,
        }
    }
}

impl Reconcilable for Task {
    fn stable_id(&self) -> Option<Uuid> {
        Some(*self.id.as_uuid())
    }

    fn content_key(&self) -> ContentKey {
        ContentKey {
            timestamp: self.created_at,
            fields: format!("{}:{}", self.owner_id, self.title),
        }
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Tasks(t) => Some(t),
            _ => None,
        }
    }
}

impl Reconcilable for ActivityRecord {
    fn stable_id(&self) -> Option<Uuid> {
        Some(*self.id.as_uuid())
    }

    fn content_key(&self) -> ContentKey {
        ContentKey {
            timestamp: self.created_at,
            fields: format!("{:?}:{}:{}", self.activity_type, self.actor_id, self.payload),
        }
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Activity(a) => Some(a),
            _ => None,
        }
    }
}
