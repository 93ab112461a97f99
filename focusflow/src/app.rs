//! Composition root: one backend, one activity log, and the services on top.

use std::sync::Arc;

use focusflow_proto::ids::UserId;
use tokio::sync::mpsc;

use crate::assistant::{TaskAssistant, TextGenerator};
use crate::backend::Backend;
use crate::config::CoreConfig;
use crate::session::Session;
use crate::sharing::{
    AccessEvaluator, ActivityRecorder, ActivityWarning, IdentityResolver, InvitationWorkflow,
    ShareLedger, SharingError, SharingViews,
};
use crate::tasks::TaskService;

/// Every sharing service wired to a single backend.
pub struct App<B> {
    backend: Arc<B>,
    config: CoreConfig,
    recorder: Arc<ActivityRecorder<B>>,
    identity: IdentityResolver<B>,
    access: AccessEvaluator<B>,
    ledger: ShareLedger<B>,
    workflow: InvitationWorkflow<B>,
    tasks: TaskService<B>,
}

impl<B: Backend + 'static> App<B> {
    /// Wires the services over `backend`.
    ///
    /// Returns the app and the receiver for activity-log warnings.
    pub fn new(backend: Arc<B>, config: CoreConfig) -> (Self, mpsc::Receiver<ActivityWarning>) {
        let (recorder, warnings) =
            ActivityRecorder::new(Arc::clone(&backend), config.activity_warning_buffer);
        let recorder = Arc::new(recorder);
        let app = Self {
            identity: IdentityResolver::new(Arc::clone(&backend)),
            access: AccessEvaluator::new(Arc::clone(&backend)),
            ledger: ShareLedger::new(Arc::clone(&backend), Arc::clone(&recorder)),
            workflow: InvitationWorkflow::new(Arc::clone(&backend), Arc::clone(&recorder)),
            tasks: TaskService::new(Arc::clone(&backend), Arc::clone(&recorder)),
            backend,
            config,
            recorder,
        };
        (app, warnings)
    }

    /// The backend.
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The resolved core configuration.
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// E-mail resolution.
    pub const fn identity(&self) -> &IdentityResolver<B> {
        &self.identity
    }

    /// Permission lookups.
    pub const fn access(&self) -> &AccessEvaluator<B> {
        &self.access
    }

    /// Owner-side share operations.
    pub const fn ledger(&self) -> &ShareLedger<B> {
        &self.ledger
    }

    /// Grantee-side invitation answers.
    pub const fn workflow(&self) -> &InvitationWorkflow<B> {
        &self.workflow
    }

    /// Task mutations.
    pub const fn tasks(&self) -> &TaskService<B> {
        &self.tasks
    }

    /// The activity log writer.
    pub const fn recorder(&self) -> &Arc<ActivityRecorder<B>> {
        &self.recorder
    }

    /// Starts the background retry of failed activity appends.
    pub fn spawn_activity_retry(&self) -> tokio::task::JoinHandle<()> {
        self.recorder
            .spawn_retry_task(self.config.activity_retry_interval)
    }

    /// View aggregators for `user`.
    pub fn views_for(&self, user: UserId) -> SharingViews<B> {
        SharingViews::new(
            user,
            self.ledger.clone(),
            self.workflow.clone(),
            self.config.request_timeout,
        )
    }

    /// Signs in the user registered under `email`.
    ///
    /// # Errors
    ///
    /// As for [`IdentityResolver::resolve_profile`].
    pub async fn login(&self, email: &str) -> Result<Session<B>, SharingError> {
        let user = self.identity.resolve_profile(email).await?;
        let views = self.views_for(user.id);
        Ok(Session::new(
            user,
            Arc::clone(&self.backend),
            views,
            self.config.max_dedup_tracking,
        ))
    }

    /// A task assistant over `generator`.
    pub fn assistant<G: TextGenerator>(&self, generator: Arc<G>) -> TaskAssistant<B, G> {
        TaskAssistant::new(Arc::clone(&self.backend), generator, self.config.history_limit)
    }
}
