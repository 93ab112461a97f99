//! Integration tests for the per-task assistant chat.
//!
//! The transcript a screen shows is a live view: sending a message never
//! appends locally, so both the question and the reply must arrive through
//! the change feed exactly once.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use focusflow::App;
use focusflow::assistant::{AssistantError, GenerationContext, TextGenerator};
use focusflow::backend::memory::MemoryBackend;
use focusflow::config::CoreConfig;
use focusflow::realtime::{LiveUpdate, Reconciled};
use focusflow::sharing::SharingError;
use focusflow_proto::chat::ChatRole;
use focusflow_proto::share::{PermissionLevel, ShareDecision};
use focusflow_proto::task::{NewTask, Task};
use focusflow_proto::user::UserProfile;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replies with the task title and how much history it saw.
struct Scripted;

impl TextGenerator for Scripted {
    async fn generate(&self, prompt: &str, context: &GenerationContext) -> Result<String, String> {
        Ok(format!(
            "[{}] {prompt} (history {})",
            context.task_title,
            context.history.len()
        ))
    }
}

struct Offline;

impl TextGenerator for Offline {
    async fn generate(&self, _prompt: &str, _context: &GenerationContext) -> Result<String, String> {
        Err("model offline".to_string())
    }
}

struct World {
    app: App<MemoryBackend>,
    alice: UserProfile,
    bob: UserProfile,
    task: Task,
}

async fn world(history_limit: usize) -> World {
    let backend = Arc::new(MemoryBackend::new());
    let alice = backend
        .register_user("alice@example.com", None)
        .await
        .unwrap();
    let bob = backend.register_user("bob@example.com", None).await.unwrap();
    let config = CoreConfig {
        history_limit,
        ..CoreConfig::default()
    };
    let (app, _warnings) = App::new(backend, config);
    let task = app
        .tasks()
        .create_task(alice.id, NewTask::titled("Launch plan"))
        .await
        .unwrap();
    World {
        app,
        alice,
        bob,
        task,
    }
}

async fn grant_bob(w: &World, level: PermissionLevel) {
    let share = w
        .app
        .ledger()
        .create_share(w.alice.id, w.task.id, "bob@example.com", level)
        .await
        .unwrap();
    w.app
        .workflow()
        .respond(w.bob.id, share.id, ShareDecision::Accepted)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transcript_is_fed_by_the_change_feed() {
    let w = world(20).await;
    let session = w.app.login("alice@example.com").await.unwrap();
    let mut transcript = session.watch_transcript(w.task.id).await.unwrap();
    assert!(transcript.items().is_empty());

    let assistant = w.app.assistant(Arc::new(Scripted));
    let reply = assistant
        .ask(w.alice.id, w.task.id, "what first?")
        .await
        .unwrap();
    assert_eq!(reply.content, "[Launch plan] what first? (history 0)");

    // Nothing was appended locally.
    assert!(transcript.items().is_empty());
    assert_eq!(
        transcript.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Inserted)
    );
    assert_eq!(
        transcript.pump().await.unwrap(),
        LiveUpdate::Applied(Reconciled::Inserted)
    );
    let roles: Vec<ChatRole> = transcript.items().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);
    assert_eq!(transcript.items()[1].id, reply.id);
    assert_eq!(transcript.sync().await.unwrap(), 0);
}

#[tokio::test]
async fn admin_grantees_can_chat_editors_cannot() {
    let w = world(20).await;
    grant_bob(&w, PermissionLevel::Edit).await;
    let bob = w.app.login("bob@example.com").await.unwrap();
    let assistant = w.app.assistant(Arc::new(Scripted));

    assert!(matches!(
        assistant.ask(w.bob.id, w.task.id, "hello").await,
        Err(AssistantError::Sharing(SharingError::Forbidden(_)))
    ));
    assert!(matches!(
        bob.watch_transcript(w.task.id).await,
        Err(SharingError::Forbidden(_))
    ));

    // Upgrading to admin opens the chat.
    w.app
        .ledger()
        .update_permission(w.alice.id, w.task.id, w.bob.id, PermissionLevel::Admin)
        .await
        .unwrap();
    let mut transcript = bob.watch_transcript(w.task.id).await.unwrap();
    assistant.ask(w.bob.id, w.task.id, "hello").await.unwrap();
    transcript.pump().await.unwrap();
    transcript.pump().await.unwrap();
    assert_eq!(transcript.items().len(), 2);
    assert_eq!(transcript.items()[0].user_id, w.bob.id);
}

#[tokio::test]
async fn history_passed_to_the_generator_is_capped() {
    let w = world(2).await;
    let assistant = w.app.assistant(Arc::new(Scripted));
    for prompt in ["one", "two", "three"] {
        assistant.ask(w.alice.id, w.task.id, prompt).await.unwrap();
    }
    let transcript = assistant.transcript(w.alice.id, w.task.id).await.unwrap();
    assert_eq!(transcript.len(), 6);
    assert_eq!(
        transcript[5].content,
        "[Launch plan] three (history 2)"
    );
}

#[tokio::test]
async fn failed_generation_still_shows_the_question() {
    let w = world(20).await;
    let session = w.app.login("alice@example.com").await.unwrap();
    let mut transcript = session.watch_transcript(w.task.id).await.unwrap();

    let assistant = w.app.assistant(Arc::new(Offline));
    let err = assistant
        .ask(w.alice.id, w.task.id, "are you there?")
        .await
        .unwrap_err();
    assert_eq!(err, AssistantError::Generation("model offline".to_string()));

    transcript.pump().await.unwrap();
    assert_eq!(transcript.items().len(), 1);
    assert_eq!(transcript.items()[0].role, ChatRole::User);
    assert_eq!(transcript.items()[0].content, "are you there?");
}

#[tokio::test]
async fn revoked_admin_loses_the_transcript() {
    let w = world(20).await;
    grant_bob(&w, PermissionLevel::Admin).await;
    let assistant = w.app.assistant(Arc::new(Scripted));
    assert!(assistant.transcript(w.bob.id, w.task.id).await.is_ok());

    w.app
        .ledger()
        .revoke(w.alice.id, w.task.id, w.bob.id)
        .await
        .unwrap();
    assert!(matches!(
        assistant.transcript(w.bob.id, w.task.id).await,
        Err(AssistantError::Sharing(SharingError::Forbidden(_)))
    ));
}
