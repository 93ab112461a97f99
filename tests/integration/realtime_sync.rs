//! Integration tests for live views over the change feed.
//!
//! Covers dedup of redelivered notifications, gap recovery after a lagging
//! subscriber, resubscription after a dropped feed, and subscription
//! teardown on close and logout.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use focusflow::App;
use focusflow::backend::memory::MemoryBackend;
use focusflow::config::CoreConfig;
use focusflow::realtime::{GranteeShares, LiveUpdate, LiveView, Reconciled, Reconciler};
use focusflow::sharing::SharingError;
use focusflow_proto::chat::{ChatMessage, ChatRole};
use focusflow_proto::feed::{ChangeEvent, ChangeOp, Row};
use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::share::{PermissionLevel, ShareDecision, ShareStatus};
use focusflow_proto::task::{NewTask, Task};
use focusflow_proto::user::UserProfile;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct World {
    backend: Arc<MemoryBackend>,
    app: App<MemoryBackend>,
    alice: UserProfile,
    bob: UserProfile,
}

async fn world_with_capacity(capacity: usize) -> World {
    let backend = Arc::new(MemoryBackend::with_feed_capacity(capacity));
    let alice = backend
        .register_user("alice@example.com", None)
        .await
        .unwrap();
    let bob = backend.register_user("bob@example.com", None).await.unwrap();
    let config = CoreConfig {
        feed_capacity: capacity,
        ..CoreConfig::default()
    };
    let (app, _warnings) = App::new(Arc::clone(&backend), config);
    World {
        backend,
        app,
        alice,
        bob,
    }
}

async fn world() -> World {
    world_with_capacity(1024).await
}

async fn task(w: &World, title: &str) -> Task {
    w.app
        .tasks()
        .create_task(w.alice.id, NewTask::titled(title))
        .await
        .unwrap()
}

async fn share(w: &World, task_id: TaskId) -> focusflow_proto::share::Share {
    w.app
        .ledger()
        .create_share(w.alice.id, task_id, "bob@example.com", PermissionLevel::View)
        .await
        .unwrap()
}

async fn bobs_shares(w: &World) -> LiveView<GranteeShares<MemoryBackend>> {
    LiveView::open(
        w.backend.as_ref(),
        GranteeShares::new(Arc::clone(&w.backend), w.bob.id),
        None,
    )
    .await
    .unwrap()
}

fn chat_insert(message: &ChatMessage) -> ChangeEvent {
    ChangeEvent::new(ChangeOp::Insert, Row::ChatMessages(message.clone()))
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[test]
fn redelivered_notification_yields_one_entry() {
    let message = ChatMessage::new(TaskId::new(), UserId::new(), ChatRole::User, "hello");
    let mut projection = Reconciler::<ChatMessage>::new();

    assert_eq!(projection.apply(chat_insert(&message)), Reconciled::Inserted);
    assert_eq!(projection.apply(chat_insert(&message)), Reconciled::Duplicate);
    assert_eq!(projection.items(), std::slice::from_ref(&message));
}

#[test]
fn late_redelivery_after_delete_stays_removed() {
    let message = ChatMessage::new(TaskId::new(), UserId::new(), ChatRole::User, "hello");
    let mut projection = Reconciler::<ChatMessage>::new();
    projection.apply(chat_insert(&message));
    let delete = ChangeEvent::new(ChangeOp::Delete, Row::ChatMessages(message.clone()));

    assert_eq!(projection.apply(delete), Reconciled::Removed);
    assert_eq!(projection.apply(chat_insert(&message)), Reconciled::Duplicate);
    assert!(projection.is_empty());
}

#[tokio::test]
async fn updates_replace_rows_fetched_at_open() {
    let w = world().await;
    let t = task(&w, "Plan").await;
    let created = share(&w, t.id).await;

    let mut view = bobs_shares(&w).await;
    assert_eq!(view.items().len(), 1);
    assert_eq!(view.sync().await.unwrap(), 0);

    w.app
        .workflow()
        .respond(w.bob.id, created.id, ShareDecision::Accepted)
        .await
        .unwrap();
    assert_eq!(view.sync().await.unwrap(), 1);
    assert_eq!(view.items().len(), 1);
    assert_eq!(view.items()[0].status, ShareStatus::Accepted);
}

// ---------------------------------------------------------------------------
// Following a grantee's shares
// ---------------------------------------------------------------------------

#[tokio::test]
async fn grantee_view_follows_the_invitation_lifecycle() {
    let w = world().await;
    let t = task(&w, "Draft report").await;
    let mut view = bobs_shares(&w).await;
    assert!(view.items().is_empty());

    let created = share(&w, t.id).await;
    assert_eq!(
        view.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Inserted)
    );
    assert_eq!(view.items()[0].id, created.id);

    // Responding does not touch the view; the feed does.
    w.app
        .workflow()
        .respond(w.bob.id, created.id, ShareDecision::Accepted)
        .await
        .unwrap();
    assert_eq!(
        view.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Updated)
    );
    assert_eq!(view.items()[0].status, ShareStatus::Accepted);

    w.app
        .ledger()
        .revoke(w.alice.id, t.id, w.bob.id)
        .await
        .unwrap();
    assert_eq!(
        view.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Removed)
    );
    assert!(view.items().is_empty());
}

// ---------------------------------------------------------------------------
// Gap recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lagging_subscriber_refetches_full_state() {
    let w = world_with_capacity(2).await;
    let mut view = bobs_shares(&w).await;

    for i in 0..5 {
        let t = task(&w, &format!("Task {i}")).await;
        share(&w, t.id).await;
    }

    // The feed overflowed: the first item is a gap and triggers a refetch.
    assert_eq!(view.pump().await.unwrap(), LiveUpdate::Refetched);
    assert_eq!(view.items().len(), 5);

    // Whatever was still buffered is already reflected.
    view.sync().await.unwrap();
    assert_eq!(view.items().len(), 5);
}

#[tokio::test]
async fn dropped_feed_is_stale_until_resumed() {
    let w = world().await;
    let t = task(&w, "Plan").await;
    let mut view = bobs_shares(&w).await;
    assert!(view.is_live());

    w.backend.drop_feed();
    assert_eq!(view.pump().await.unwrap(), LiveUpdate::Disconnected);
    assert!(!view.is_live());

    // Missed while disconnected.
    let created = share(&w, t.id).await;
    assert!(view.items().is_empty());

    view.resume(w.backend.as_ref()).await.unwrap();
    assert!(view.is_live());
    assert_eq!(view.items().len(), 1);

    // Incremental updates flow again.
    w.app
        .workflow()
        .respond(w.bob.id, created.id, ShareDecision::Rejected)
        .await
        .unwrap();
    assert_eq!(
        view.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Updated)
    );
    assert_eq!(view.items()[0].status, ShareStatus::Rejected);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closing_a_view_releases_its_subscription() {
    let w = world().await;
    let mut first = bobs_shares(&w).await;
    assert_eq!(w.backend.subscriber_count(), 1);
    first.close();
    assert_eq!(w.backend.subscriber_count(), 0);

    // Remounting does not accumulate subscriptions.
    for _ in 0..3 {
        let view = bobs_shares(&w).await;
        drop(view);
    }
    assert_eq!(w.backend.subscriber_count(), 0);
}

#[tokio::test]
async fn logout_ends_every_view_of_the_session() {
    let w = world().await;
    let t = task(&w, "Plan").await;
    let alice = w.app.login("alice@example.com").await.unwrap();
    let bob = w.app.login("bob@example.com").await.unwrap();

    let mut shares = bob.watch_my_shares().await.unwrap();
    let mut activity = alice.watch_activity(t.id).await.unwrap();
    assert_eq!(activity.items().len(), 1);
    assert_eq!(w.backend.subscriber_count(), 2);

    bob.logout();
    assert_eq!(shares.pump().await.unwrap(), LiveUpdate::Disconnected);
    assert_eq!(w.backend.subscriber_count(), 1);

    // Alice's session is unaffected.
    share(&w, t.id).await;
    assert_eq!(
        activity.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Inserted)
    );
    assert_eq!(activity.items().len(), 2);
    assert!(alice.is_active());
}

#[tokio::test]
async fn session_views_are_access_checked() {
    let w = world().await;
    let t = task(&w, "Plan").await;
    let bob = w.app.login("bob@example.com").await.unwrap();

    assert!(matches!(
        bob.watch_activity(t.id).await,
        Err(SharingError::Forbidden(_))
    ));
    assert!(matches!(
        bob.watch_task_shares(t.id).await,
        Err(SharingError::Forbidden(_))
    ));
    assert!(matches!(
        bob.watch_transcript(TaskId::new()).await,
        Err(SharingError::NotFound(_))
    ));
    assert_eq!(w.backend.subscriber_count(), 0);
}
