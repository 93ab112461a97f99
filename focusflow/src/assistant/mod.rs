//! Per-task assistant chat, gated on admin access.
//!
//! The text-generation service is opaque: it takes a prompt plus context and
//! returns text. Conversing with it acts on the owner's behalf, so only the
//! owner and accepted `admin` grantees may use it; `edit` is not enough.
//!
//! Nothing here appends to a local transcript. Both the user's message and
//! the reply are written to the store, and the transcript a screen shows is
//! a live view fed by the change feed (see [`crate::realtime::TaskTranscript`]).

use std::future::Future;
use std::sync::Arc;

use focusflow_proto::chat::{ChatMessage, ChatRole, MAX_CHAT_MESSAGE_SIZE};
use focusflow_proto::ids::{TaskId, UserId};

use crate::backend::Backend;
use crate::sharing::{AccessEvaluator, SharingError};

/// Default number of earlier messages passed to the generator.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// What the generator is told about the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    /// Task title.
    pub task_title: String,
    /// Task description.
    pub task_description: String,
    /// Most recent transcript entries, oldest first.
    pub history: Vec<ChatMessage>,
}

/// Opaque text-generation service.
pub trait TextGenerator: Send + Sync {
    /// Produces a reply to `prompt`.
    fn generate(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> impl Future<Output = Result<String, String>> + Send;
}

/// Errors from the task assistant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    /// Access or store failure.
    #[error(transparent)]
    Sharing(#[from] SharingError),

    /// The message is blank.
    #[error("message is empty")]
    EmptyMessage,

    /// The message exceeds [`MAX_CHAT_MESSAGE_SIZE`] bytes.
    #[error("message too long ({len} bytes, max {MAX_CHAT_MESSAGE_SIZE})")]
    MessageTooLong {
        /// Actual length in bytes.
        len: usize,
    },

    /// The generator failed. The user's message was already stored.
    #[error("assistant reply failed: {0}")]
    Generation(String),
}

/// Chat assistant for tasks.
pub struct TaskAssistant<B, G> {
    backend: Arc<B>,
    access: AccessEvaluator<B>,
    generator: Arc<G>,
    history_limit: usize,
}

impl<B: Backend, G: TextGenerator> TaskAssistant<B, G> {
    /// Creates an assistant that passes up to `history_limit` earlier
    /// messages as context.
    pub fn new(backend: Arc<B>, generator: Arc<G>, history_limit: usize) -> Self {
        Self {
            access: AccessEvaluator::new(Arc::clone(&backend)),
            backend,
            generator,
            history_limit,
        }
    }

    /// Sends `prompt` about `task_id` and stores the reply.
    ///
    /// Returns the stored reply.
    ///
    /// # Errors
    ///
    /// - [`AssistantError::Sharing`] wrapping `Forbidden` below `admin`,
    ///   `NotFound` for a missing task, or `Transient` on store failure.
    /// - [`AssistantError::EmptyMessage`] / [`AssistantError::MessageTooLong`].
    /// - [`AssistantError::Generation`] if the generator fails.
    pub async fn ask(
        &self,
        caller: UserId,
        task_id: TaskId,
        prompt: &str,
    ) -> Result<ChatMessage, AssistantError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AssistantError::EmptyMessage);
        }
        if prompt.len() > MAX_CHAT_MESSAGE_SIZE {
            return Err(AssistantError::MessageTooLong { len: prompt.len() });
        }
        let (task, _) = self.access.require_chat(task_id, caller).await?;

        let mut history = self
            .backend
            .messages_for_task(&task_id)
            .await
            .map_err(SharingError::from)?;
        let skip = history.len().saturating_sub(self.history_limit);
        history.drain(..skip);

        let question = ChatMessage::new(task_id, caller, ChatRole::User, prompt);
        self.backend
            .insert_message(&question)
            .await
            .map_err(SharingError::from)?;

        let context = GenerationContext {
            task_title: task.title,
            task_description: task.description,
            history,
        };
        let text = self.generator.generate(prompt, &context).await.map_err(|e| {
            tracing::warn!(task_id = %task_id, error = %e, "assistant generation failed");
            AssistantError::Generation(e)
        })?;

        let reply = ChatMessage::new(task_id, caller, ChatRole::Assistant, text);
        self.backend
            .insert_message(&reply)
            .await
            .map_err(SharingError::from)?;
        tracing::debug!(task_id = %task_id, "assistant replied");
        Ok(reply)
    }

    /// The task's transcript, oldest first.
    ///
    /// # Errors
    ///
    /// As for [`ask`](Self::ask), minus message validation.
    pub async fn transcript(
        &self,
        caller: UserId,
        task_id: TaskId,
    ) -> Result<Vec<ChatMessage>, AssistantError> {
        self.access.require_chat(task_id, caller).await?;
        Ok(self
            .backend
            .messages_for_task(&task_id)
            .await
            .map_err(SharingError::from)?)
    }
}
