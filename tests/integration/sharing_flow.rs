//! Integration tests for task sharing end to end.
//!
//! Drives the ledger, invitation workflow, access checks, activity log and
//! view aggregators together over the in-memory backend, the way two
//! signed-in users would.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;

use focusflow::App;
use focusflow::assistant::{AssistantError, GenerationContext, TextGenerator};
use focusflow::backend::memory::MemoryBackend;
use focusflow::backend::{ActivityStore, ShareStore};
use focusflow::config::CoreConfig;
use focusflow::sharing::{ActivityWarning, RETRY_MESSAGE, SharingError};
use focusflow_proto::activity::ActivityType;
use focusflow_proto::ids::{ShareId, TaskId};
use focusflow_proto::share::{EffectivePermission, PermissionLevel, ShareDecision, ShareStatus};
use focusflow_proto::task::{NewTask, Task, TaskStatus};
use focusflow_proto::user::UserProfile;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Echo;

impl TextGenerator for Echo {
    async fn generate(&self, prompt: &str, _context: &GenerationContext) -> Result<String, String> {
        Ok(prompt.to_string())
    }
}

struct World {
    backend: Arc<MemoryBackend>,
    app: App<MemoryBackend>,
    warnings: mpsc::Receiver<ActivityWarning>,
    alice: UserProfile,
    bob: UserProfile,
}

async fn world() -> World {
    let backend = Arc::new(MemoryBackend::new());
    let alice = backend
        .register_user("alice@example.com", Some("Alice".to_string()))
        .await
        .unwrap();
    let bob = backend
        .register_user("bob@example.com", Some("Bob".to_string()))
        .await
        .unwrap();
    let (app, warnings) = App::new(Arc::clone(&backend), CoreConfig::default());
    World {
        backend,
        app,
        warnings,
        alice,
        bob,
    }
}

async fn draft_report(w: &World) -> Task {
    let new = NewTask {
        title: "Draft report".to_string(),
        description: "Quarterly numbers".to_string(),
        ..NewTask::default()
    };
    w.app.tasks().create_task(w.alice.id, new).await.unwrap()
}

async fn share_with_bob(w: &World, task: &Task, level: PermissionLevel) -> ShareId {
    w.app
        .ledger()
        .create_share(w.alice.id, task.id, "bob@example.com", level)
        .await
        .unwrap()
        .id
}

async fn permission(w: &World, task_id: TaskId) -> EffectivePermission {
    w.app
        .access()
        .permission_for(task_id, w.bob.id)
        .await
        .unwrap()
        .1
}

async fn activity_types(w: &World, task_id: TaskId) -> Vec<ActivityType> {
    w.backend
        .activity_for_task(&task_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.activity_type)
        .collect()
}

// ---------------------------------------------------------------------------
// The full lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn share_accept_upgrade_revoke() {
    let w = world().await;
    let task = draft_report(&w).await;
    let alice = w.app.login("alice@example.com").await.unwrap();
    let bob = w.app.login("bob@example.com").await.unwrap();

    // Alice shares at view level.
    let panel = alice
        .views()
        .share(task.id, "bob@example.com", PermissionLevel::View)
        .await
        .unwrap();
    assert_eq!(panel.len(), 1);
    assert_eq!(panel[0].grantee.email, "bob@example.com");
    assert_eq!(panel[0].share.status, ShareStatus::Pending);
    assert_eq!(permission(&w, task.id).await, EffectivePermission::None);

    // Bob sees one pending invitation.
    let snapshot = bob.views().refresh().await.unwrap();
    assert_eq!(snapshot.pending_count, 1);
    let invite = &snapshot.pending[0];
    assert_eq!(invite.task_title, "Draft report");
    assert_eq!(invite.permission_label, "View Only");
    assert_eq!(invite.owner.id, w.alice.id);
    assert!(snapshot.shared_with_me.is_empty());

    // Accepting refreshes both lists.
    let snapshot = bob.views().accept(invite.share_id).await.unwrap();
    assert_eq!(snapshot.pending_count, 0);
    assert_eq!(snapshot.shared_with_me.len(), 1);
    let shared = &snapshot.shared_with_me[0];
    assert_eq!(shared.task.id, task.id);
    assert!(shared.is_shared);
    assert_eq!(shared.shared_by.id, w.alice.id);
    assert_eq!(shared.shared_by.name, "Alice");
    assert_eq!(permission(&w, task.id).await, EffectivePermission::View);

    // A viewer cannot change the task.
    let err = w
        .app
        .tasks()
        .update_status(w.bob.id, task.id, TaskStatus::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::Forbidden(_)));

    // Upgrade to edit: status changes work, chat does not.
    let panel = alice
        .views()
        .update_permission(task.id, w.bob.id, PermissionLevel::Edit)
        .await
        .unwrap();
    assert_eq!(panel[0].share.permission, PermissionLevel::Edit);
    let updated = w
        .app
        .tasks()
        .update_status(w.bob.id, task.id, TaskStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::InProgress);

    let assistant = w.app.assistant(Arc::new(Echo));
    assert!(matches!(
        assistant.ask(w.bob.id, task.id, "summarise").await,
        Err(AssistantError::Sharing(SharingError::Forbidden(_)))
    ));

    // Revoke: the task disappears from Bob's list and access is gone.
    let panel = alice.views().revoke(task.id, w.bob.id).await.unwrap();
    assert!(panel.is_empty());
    let snapshot = bob.views().refresh().await.unwrap();
    assert!(snapshot.shared_with_me.is_empty());
    assert_eq!(permission(&w, task.id).await, EffectivePermission::None);

    assert_eq!(
        activity_types(&w, task.id).await,
        vec![
            ActivityType::Create,
            ActivityType::Share,
            ActivityType::StatusChange,
            ActivityType::Update,
            ActivityType::Update,
            ActivityType::Unshare,
        ]
    );
}

#[tokio::test]
async fn second_response_is_invalid_state() {
    let w = world().await;
    let task = draft_report(&w).await;
    let share_id = share_with_bob(&w, &task, PermissionLevel::View).await;

    w.app
        .workflow()
        .respond(w.bob.id, share_id, ShareDecision::Accepted)
        .await
        .unwrap();
    let err = w
        .app
        .workflow()
        .respond(w.bob.id, share_id, ShareDecision::Rejected)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SharingError::InvalidState {
            share_id,
            status: ShareStatus::Accepted,
        }
    );
    assert_eq!(err.user_message(), "This invitation was already accepted.");

    let share = w.backend.get_share(&share_id).await.unwrap().unwrap();
    assert_eq!(share.status, ShareStatus::Accepted);
}

// ---------------------------------------------------------------------------
// Ledger rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_the_owner_manages_shares() {
    let w = world().await;
    let task = draft_report(&w).await;

    let err = w
        .app
        .ledger()
        .create_share(w.bob.id, task.id, "alice@example.com", PermissionLevel::Admin)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::Forbidden(_)));

    share_with_bob(&w, &task, PermissionLevel::View).await;
    let err = w
        .app
        .ledger()
        .update_permission(w.bob.id, task.id, w.bob.id, PermissionLevel::Admin)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::Forbidden(_)));
    assert!(w.app.ledger().list_shares(w.bob.id, task.id).await.is_err());
}

#[tokio::test]
async fn share_target_must_be_someone_else_who_exists() {
    let w = world().await;
    let task = draft_report(&w).await;

    let err = w
        .app
        .ledger()
        .create_share(w.alice.id, task.id, "nobody@example.com", PermissionLevel::View)
        .await
        .unwrap_err();
    assert_eq!(err, SharingError::NotFound("user".to_string()));

    let err = w
        .app
        .ledger()
        .create_share(w.alice.id, task.id, "alice@example.com", PermissionLevel::View)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::InvalidRequest(_)));
}

#[tokio::test]
async fn resharing_keeps_one_share_per_grantee() {
    let w = world().await;
    let task = draft_report(&w).await;
    let first = share_with_bob(&w, &task, PermissionLevel::View).await;

    w.app
        .workflow()
        .respond(w.bob.id, first, ShareDecision::Rejected)
        .await
        .unwrap();

    // Sharing again re-opens the rejected invitation in place.
    let second = share_with_bob(&w, &task, PermissionLevel::Edit).await;
    assert_eq!(first, second);
    let shares = w.backend.shares_for_task(&task.id).await.unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].status, ShareStatus::Pending);
    assert_eq!(shares[0].permission, PermissionLevel::Edit);

    // Once accepted, a re-share only changes the level.
    w.app
        .workflow()
        .respond(w.bob.id, first, ShareDecision::Accepted)
        .await
        .unwrap();
    share_with_bob(&w, &task, PermissionLevel::Admin).await;
    let shares = w.backend.shares_for_task(&task.id).await.unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].status, ShareStatus::Accepted);
    assert_eq!(permission(&w, task.id).await, EffectivePermission::Admin);
}

#[tokio::test]
async fn revoking_nothing_is_not_an_error() {
    let w = world().await;
    let task = draft_report(&w).await;

    let revoked = w
        .app
        .ledger()
        .revoke(w.alice.id, task.id, w.bob.id)
        .await
        .unwrap();
    assert!(revoked.is_none());
    let revoked = w
        .app
        .ledger()
        .revoke(w.alice.id, TaskId::new(), w.bob.id)
        .await
        .unwrap();
    assert!(revoked.is_none());
    assert!(!activity_types(&w, task.id).await.contains(&ActivityType::Unshare));
}

#[tokio::test]
async fn only_the_grantee_may_respond() {
    let w = world().await;
    let task = draft_report(&w).await;
    let share_id = share_with_bob(&w, &task, PermissionLevel::View).await;

    let err = w
        .app
        .workflow()
        .respond(w.alice.id, share_id, ShareDecision::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::Forbidden(_)));
    let share = w.backend.get_share(&share_id).await.unwrap().unwrap();
    assert_eq!(share.status, ShareStatus::Pending);
}

#[tokio::test]
async fn deleting_a_task_removes_its_shares() {
    let w = world().await;
    let task = draft_report(&w).await;
    let share_id = share_with_bob(&w, &task, PermissionLevel::View).await;

    w.app.tasks().delete_task(w.alice.id, task.id).await.unwrap();
    assert!(w.backend.shares_for_task(&task.id).await.unwrap().is_empty());
    let bob = w.app.views_for(w.bob.id);
    assert!(bob.pending_invitations().await.unwrap().is_empty());

    // Each removed share leaves an unshare record before the delete.
    let log = w.backend.activity_for_task(&task.id).await.unwrap();
    let kinds: Vec<ActivityType> = log.iter().map(|r| r.activity_type).collect();
    assert_eq!(
        kinds,
        vec![
            ActivityType::Create,
            ActivityType::Share,
            ActivityType::Unshare,
            ActivityType::Delete,
        ]
    );
    assert_eq!(log[2].payload["grantee_id"], serde_json::json!(w.bob.id));
    assert_eq!(log[2].payload["share_id"], serde_json::json!(share_id));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn activity_failures_never_block_the_mutation() {
    let mut w = world().await;
    let task = draft_report(&w).await;

    w.backend.fail_activity_writes(true);
    share_with_bob(&w, &task, PermissionLevel::View).await;

    let warning = w.warnings.recv().await.unwrap();
    assert!(matches!(
        warning,
        ActivityWarning::WriteFailed {
            activity_type: ActivityType::Share,
            ..
        }
    ));
    assert_eq!(w.app.recorder().pending_count().await, 1);
    assert_eq!(activity_types(&w, task.id).await, vec![ActivityType::Create]);

    w.backend.fail_activity_writes(false);
    assert_eq!(w.app.recorder().flush_pending().await, 1);
    assert_eq!(
        activity_types(&w, task.id).await,
        vec![ActivityType::Create, ActivityType::Share]
    );
}

#[tokio::test]
async fn store_outage_surfaces_a_retryable_error() {
    let w = world().await;
    let task = draft_report(&w).await;
    let alice = w.app.login("alice@example.com").await.unwrap();

    w.backend.set_unavailable(true);
    let err = alice
        .views()
        .share(task.id, "bob@example.com", PermissionLevel::View)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.user_message(), RETRY_MESSAGE);

    // The action is not left in flight: a retry after recovery goes through.
    w.backend.set_unavailable(false);
    let panel = alice
        .views()
        .share(task.id, "bob@example.com", PermissionLevel::View)
        .await
        .unwrap();
    assert_eq!(panel.len(), 1);
}

#[tokio::test]
async fn login_requires_a_registered_email() {
    let w = world().await;
    assert!(matches!(
        w.app.login("stranger@example.com").await,
        Err(SharingError::NotFound(_))
    ));
    let session = w.app.login("  bob@example.com ").await.unwrap();
    assert_eq!(session.user_id(), w.bob.id);
    assert!(!session.preferences().dark_mode);
    session.set_dark_mode(true);
    assert!(session.preferences().dark_mode);
}
