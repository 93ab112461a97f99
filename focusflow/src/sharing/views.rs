//! Read-side projections of the share ledger for one signed-in user.
//!
//! There is no fine-grained invalidation: every mutating action re-runs
//! every query it could have affected and returns the fresh result. Each
//! store round trip is bounded by the configured request timeout, and an
//! action that is already in flight is refused with
//! [`SharingError::Busy`] rather than submitted twice.
//!
//! Mutations run on their own task. A timeout stops the wait, never the
//! mutation, so a committed change always gets its activity record.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use focusflow_proto::ids::{ShareId, TaskId, Timestamp, UserId};
use focusflow_proto::share::{PermissionLevel, Share, ShareDecision, ShareStatus};
use focusflow_proto::task::Task;
use focusflow_proto::user::UserSummary;
use serde::{Deserialize, Serialize};

use super::{InvitationWorkflow, ShareEntry, ShareLedger, SharingError};
use crate::backend::{Backend, BackendError};

/// An invitation awaiting the signed-in user's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvitation {
    /// The share to answer.
    pub share_id: ShareId,
    /// The shared task.
    pub task_id: TaskId,
    /// Task title.
    pub task_title: String,
    /// Task description.
    pub task_description: String,
    /// Who is sharing.
    pub owner: UserSummary,
    /// Offered access level.
    pub permission: PermissionLevel,
    /// Display label for `permission` ("View Only", ...).
    pub permission_label: String,
    /// When the invitation was sent.
    pub created_at: Timestamp,
}

/// A task someone else shared with the signed-in user, already accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedTask {
    /// The task.
    pub task: Task,
    /// Always `true`; lets mixed task lists tell shared tasks apart.
    pub is_shared: bool,
    /// The owner's display identity.
    pub shared_by: UserSummary,
    /// Access level held.
    pub permission: PermissionLevel,
}

/// Everything the grantee-side screens show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingSnapshot {
    /// Unanswered invitations.
    pub pending: Vec<PendingInvitation>,
    /// Accepted shares with their tasks.
    pub shared_with_me: Vec<SharedTask>,
    /// Badge count; equals `pending.len()`.
    pub pending_count: usize,
}

/// Identity of an action for duplicate-submission detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Action {
    Respond(ShareId),
    Share(TaskId, String),
    Permission(TaskId, UserId),
    Revoke(TaskId, UserId),
}

/// Removes its action from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a parking_lot::Mutex<HashSet<Action>>,
    action: Action,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.action);
    }
}

/// View aggregators for one user.
pub struct SharingViews<B> {
    user: UserId,
    ledger: ShareLedger<B>,
    workflow: InvitationWorkflow<B>,
    timeout: Duration,
    in_flight: parking_lot::Mutex<HashSet<Action>>,
    last: parking_lot::Mutex<SharingSnapshot>,
}

impl<B: Backend + 'static> SharingViews<B> {
    /// Creates the views for `user`.
    pub fn new(
        user: UserId,
        ledger: ShareLedger<B>,
        workflow: InvitationWorkflow<B>,
        timeout: Duration,
    ) -> Self {
        Self {
            user,
            ledger,
            workflow,
            timeout,
            in_flight: parking_lot::Mutex::new(HashSet::new()),
            last: parking_lot::Mutex::new(SharingSnapshot::default()),
        }
    }

    /// The user these views belong to.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// The most recently fetched snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SharingSnapshot {
        self.last.lock().clone()
    }

    /// Re-runs every grantee-side query.
    ///
    /// # Errors
    ///
    /// [`SharingError::Transient`] on store failure or timeout; the previous
    /// snapshot is kept.
    pub async fn refresh(&self) -> Result<SharingSnapshot, SharingError> {
        let pending = self.pending_invitations().await?;
        let shared_with_me = self.shared_with_me().await?;
        let snapshot = SharingSnapshot {
            pending_count: pending.len(),
            pending,
            shared_with_me,
        };
        *self.last.lock() = snapshot.clone();
        Ok(snapshot)
    }

    /// Invitations awaiting this user's answer, with task and owner details.
    ///
    /// # Errors
    ///
    /// [`SharingError::Transient`] on store failure or timeout.
    pub async fn pending_invitations(&self) -> Result<Vec<PendingInvitation>, SharingError> {
        let joined = self.joined(ShareStatus::Pending).await?;
        let owners = self.owners(&joined).await?;
        Ok(joined
            .into_iter()
            .map(|(share, task)| PendingInvitation {
                share_id: share.id,
                task_id: task.id,
                task_title: task.title,
                task_description: task.description,
                owner: owner_of(&owners, task.owner_id),
                permission: share.permission,
                permission_label: share.permission.label().to_string(),
                created_at: share.created_at,
            })
            .collect())
    }

    /// Accepted shares joined with their tasks.
    ///
    /// # Errors
    ///
    /// [`SharingError::Transient`] on store failure or timeout.
    pub async fn shared_with_me(&self) -> Result<Vec<SharedTask>, SharingError> {
        let joined = self.joined(ShareStatus::Accepted).await?;
        let owners = self.owners(&joined).await?;
        Ok(joined
            .into_iter()
            .map(|(share, task)| SharedTask {
                shared_by: owner_of(&owners, task.owner_id),
                task,
                is_shared: true,
                permission: share.permission,
            })
            .collect())
    }

    /// Accepts an invitation and refreshes every grantee-side view.
    ///
    /// # Errors
    ///
    /// Any error of [`InvitationWorkflow::respond`], plus
    /// [`SharingError::Busy`] while the same invitation is being answered.
    pub async fn accept(&self, share_id: ShareId) -> Result<SharingSnapshot, SharingError> {
        self.respond(share_id, ShareDecision::Accepted).await
    }

    /// Rejects an invitation and refreshes every grantee-side view.
    ///
    /// # Errors
    ///
    /// As for [`accept`](Self::accept).
    pub async fn reject(&self, share_id: ShareId) -> Result<SharingSnapshot, SharingError> {
        self.respond(share_id, ShareDecision::Rejected).await
    }

    /// Owner side: who a task is shared with.
    ///
    /// # Errors
    ///
    /// As for [`ShareLedger::list_shares`], plus timeouts.
    pub async fn shared_with_panel(&self, task_id: TaskId) -> Result<Vec<ShareEntry>, SharingError> {
        self.bounded(self.ledger.list_shares(self.user, task_id)).await
    }

    /// Shares a task and returns the refreshed shared-with panel.
    ///
    /// # Errors
    ///
    /// As for [`ShareLedger::create_share`], plus [`SharingError::Busy`].
    pub async fn share(
        &self,
        task_id: TaskId,
        grantee_email: &str,
        permission: PermissionLevel,
    ) -> Result<Vec<ShareEntry>, SharingError> {
        let email = grantee_email.trim().to_string();
        let _guard = self.begin(Action::Share(task_id, email.clone()))?;
        let (ledger, user) = (self.ledger.clone(), self.user);
        self.committed(async move {
            ledger
                .create_share(user, task_id, &email, permission)
                .await
        })
        .await?;
        self.shared_with_panel(task_id).await
    }

    /// Changes a grantee's level and returns the refreshed panel.
    ///
    /// # Errors
    ///
    /// As for [`ShareLedger::update_permission`], plus [`SharingError::Busy`].
    pub async fn update_permission(
        &self,
        task_id: TaskId,
        grantee_id: UserId,
        permission: PermissionLevel,
    ) -> Result<Vec<ShareEntry>, SharingError> {
        let _guard = self.begin(Action::Permission(task_id, grantee_id))?;
        let (ledger, user) = (self.ledger.clone(), self.user);
        self.committed(async move {
            ledger
                .update_permission(user, task_id, grantee_id, permission)
                .await
        })
        .await?;
        self.shared_with_panel(task_id).await
    }

    /// Revokes a grantee's share and returns the refreshed panel.
    ///
    /// # Errors
    ///
    /// As for [`ShareLedger::revoke`], plus [`SharingError::Busy`].
    pub async fn revoke(
        &self,
        task_id: TaskId,
        grantee_id: UserId,
    ) -> Result<Vec<ShareEntry>, SharingError> {
        let _guard = self.begin(Action::Revoke(task_id, grantee_id))?;
        let (ledger, user) = (self.ledger.clone(), self.user);
        self.committed(async move { ledger.revoke(user, task_id, grantee_id).await })
            .await?;
        self.shared_with_panel(task_id).await
    }

    async fn respond(
        &self,
        share_id: ShareId,
        decision: ShareDecision,
    ) -> Result<SharingSnapshot, SharingError> {
        let _guard = self.begin(Action::Respond(share_id))?;
        let (workflow, user) = (self.workflow.clone(), self.user);
        self.committed(async move { workflow.respond(user, share_id, decision).await })
            .await?;
        self.refresh().await
    }

    async fn joined(&self, status: ShareStatus) -> Result<Vec<(Share, Task)>, SharingError> {
        let shares = self
            .bounded(self.ledger.find_shares_for_grantee(self.user, Some(status)))
            .await?;
        self.bounded(self.ledger.with_tasks(shares)).await
    }

    async fn owners(
        &self,
        joined: &[(Share, Task)],
    ) -> Result<HashMap<UserId, UserSummary>, SharingError> {
        let mut owners = HashMap::new();
        for (_, task) in joined {
            if !owners.contains_key(&task.owner_id) {
                let summary = self.bounded(self.ledger.summary(task.owner_id)).await?;
                owners.insert(task.owner_id, summary);
            }
        }
        Ok(owners)
    }

    fn begin(&self, action: Action) -> Result<InFlight<'_>, SharingError> {
        if !self.in_flight.lock().insert(action.clone()) {
            tracing::debug!(?action, "duplicate submission refused");
            return Err(SharingError::Busy);
        }
        Ok(InFlight {
            set: &self.in_flight,
            action,
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, SharingError>>,
    ) -> Result<T, SharingError> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            tracing::warn!(timeout = ?self.timeout, "store request timed out");
            SharingError::Transient(BackendError::Unavailable("request timed out".to_string()))
        })?
    }

    /// Bounds the wait for a mutation that runs to completion regardless.
    async fn committed<T: Send + 'static>(
        &self,
        fut: impl Future<Output = Result<T, SharingError>> + Send + 'static,
    ) -> Result<T, SharingError> {
        let handle = tokio::spawn(fut);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => {
                tracing::error!(error = %join, "mutation task failed");
                Err(SharingError::Transient(BackendError::WriteFailed(
                    "mutation did not complete".to_string(),
                )))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "mutation still running after timeout");
                Err(SharingError::Transient(BackendError::Unavailable(
                    "request timed out".to_string(),
                )))
            }
        }
    }
}

fn owner_of(owners: &HashMap<UserId, UserSummary>, id: UserId) -> UserSummary {
    owners
        .get(&id)
        .cloned()
        .unwrap_or_else(|| UserSummary::unknown(id))
}
