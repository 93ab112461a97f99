//! The set of sharing relationships and the owner-side operations on it.
//!
//! At most one [`Share`] exists per `(task, grantee)` pair; sharing again
//! with the same grantee updates the existing row. Every mutation appends
//! an activity record through the [`ActivityRecorder`].

use std::sync::Arc;

use focusflow_proto::activity::ActivityType;
use focusflow_proto::ids::{TaskId, Timestamp, UserId};
use focusflow_proto::share::{PermissionLevel, Share, ShareStatus};
use focusflow_proto::task::Task;
use focusflow_proto::user::UserSummary;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AccessEvaluator, ActivityRecorder, IdentityResolver, SharingError};
use crate::backend::Backend;

/// A share with its grantee's identity filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntry {
    /// The share row.
    pub share: Share,
    /// Who it grants access to.
    pub grantee: UserSummary,
}

/// Owner of the sharing relationships.
pub struct ShareLedger<B> {
    backend: Arc<B>,
    identity: IdentityResolver<B>,
    access: AccessEvaluator<B>,
    recorder: Arc<ActivityRecorder<B>>,
}

impl<B> Clone for ShareLedger<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            identity: self.identity.clone(),
            access: self.access.clone(),
            recorder: Arc::clone(&self.recorder),
        }
    }
}

impl<B: Backend> ShareLedger<B> {
    /// Creates a ledger over `backend`, logging through `recorder`.
    pub fn new(backend: Arc<B>, recorder: Arc<ActivityRecorder<B>>) -> Self {
        Self {
            identity: IdentityResolver::new(Arc::clone(&backend)),
            access: AccessEvaluator::new(Arc::clone(&backend)),
            backend,
            recorder,
        }
    }

    /// Shares `task_id` with the user registered under `grantee_email`.
    ///
    /// A new share starts out pending. If the grantee already has a share on
    /// this task, its permission is replaced instead; a rejected share is
    /// re-opened as pending, pending and accepted ones keep their status.
    ///
    /// # Errors
    ///
    /// - [`SharingError::NotFound`] if the task or the user does not exist.
    /// - [`SharingError::Forbidden`] if `caller` does not own the task.
    /// - [`SharingError::InvalidRequest`] when sharing with the owner.
    /// - [`SharingError::Transient`] on store failure.
    pub async fn create_share(
        &self,
        caller: UserId,
        task_id: TaskId,
        grantee_email: &str,
        permission: PermissionLevel,
    ) -> Result<Share, SharingError> {
        let grantee = self.identity.resolve_profile(grantee_email).await?;
        let task = self.access.require_owner(task_id, caller).await?;
        if grantee.id == task.owner_id {
            return Err(SharingError::InvalidRequest(
                "a task cannot be shared with its owner".to_string(),
            ));
        }

        let share = match self.backend.find_share(&task.id, &grantee.id).await? {
            Some(mut existing) => {
                existing.permission = permission;
                if existing.status == ShareStatus::Rejected {
                    existing.status = ShareStatus::Pending;
                }
                existing.updated_at = Timestamp::now();
                existing
            }
            None => Share::pending(task.id, task.owner_id, grantee.id, permission),
        };
        let stored = self.backend.upsert_share(&share).await?;

        tracing::info!(
            task_id = %task.id,
            share_id = %stored.id,
            grantee = %grantee.id,
            %permission,
            status = %stored.status,
            "task shared"
        );
        self.recorder
            .record(
                task.id,
                caller,
                ActivityType::Share,
                json!({
                    "share_id": stored.id,
                    "grantee_id": grantee.id,
                    "grantee_email": grantee.email,
                    "permission": permission,
                    "status": stored.status,
                }),
            )
            .await;
        Ok(stored)
    }

    /// Lists a task's shares with grantee identities, in insertion order.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] / [`SharingError::Forbidden`] unless
    /// `caller` owns the task; [`SharingError::Transient`] on store failure.
    pub async fn list_shares(
        &self,
        caller: UserId,
        task_id: TaskId,
    ) -> Result<Vec<ShareEntry>, SharingError> {
        self.access.require_owner(task_id, caller).await?;
        let shares = self.backend.shares_for_task(&task_id).await?;
        let mut entries = Vec::with_capacity(shares.len());
        for share in shares {
            let grantee = self.summary(share.grantee_id).await?;
            entries.push(ShareEntry { share, grantee });
        }
        Ok(entries)
    }

    /// Changes the permission level of an existing share, keeping its status.
    ///
    /// # Errors
    ///
    /// - [`SharingError::NotFound`] if the task or the share does not exist.
    /// - [`SharingError::Forbidden`] if `caller` does not own the task.
    /// - [`SharingError::Transient`] on store failure.
    pub async fn update_permission(
        &self,
        caller: UserId,
        task_id: TaskId,
        grantee_id: UserId,
        permission: PermissionLevel,
    ) -> Result<Share, SharingError> {
        let task = self.access.require_owner(task_id, caller).await?;
        let mut share = self
            .backend
            .find_share(&task.id, &grantee_id)
            .await?
            .ok_or_else(|| SharingError::NotFound("share".to_string()))?;
        let old = share.permission;
        share.permission = permission;
        share.updated_at = Timestamp::now();
        if !self.backend.update_share(&share).await? {
            // Revoked between the read and the write.
            return Err(SharingError::NotFound("share".to_string()));
        }

        tracing::info!(
            task_id = %task.id,
            share_id = %share.id,
            %old,
            new = %permission,
            "share permission changed"
        );
        self.recorder
            .record(
                task.id,
                caller,
                ActivityType::Update,
                json!({
                    "share_id": share.id,
                    "grantee_id": grantee_id,
                    "old_permission": old,
                    "new_permission": permission,
                }),
            )
            .await;
        Ok(share)
    }

    /// Removes `grantee_id`'s share on `task_id`, revoking access at once.
    ///
    /// Revoking a share that does not exist (or whose task is gone) is not
    /// an error. Returns the removed share, if any.
    ///
    /// # Errors
    ///
    /// [`SharingError::Forbidden`] if the task exists and `caller` does not
    /// own it; [`SharingError::Transient`] on store failure.
    pub async fn revoke(
        &self,
        caller: UserId,
        task_id: TaskId,
        grantee_id: UserId,
    ) -> Result<Option<Share>, SharingError> {
        let task = match self.access.require_owner(task_id, caller).await {
            Ok(task) => task,
            Err(SharingError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(removed) = self.backend.delete_share(&task.id, &grantee_id).await? else {
            tracing::debug!(task_id = %task.id, grantee = %grantee_id, "revoke: no share");
            return Ok(None);
        };

        tracing::info!(task_id = %task.id, share_id = %removed.id, "share revoked");
        self.recorder
            .record(
                task.id,
                caller,
                ActivityType::Unshare,
                json!({
                    "share_id": removed.id,
                    "grantee_id": grantee_id,
                    "permission": removed.permission,
                    "status": removed.status,
                }),
            )
            .await;
        Ok(Some(removed))
    }

    /// Shares granted to `grantee_id`, optionally only those in `status`.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] on store failure.
    pub async fn find_shares_for_grantee(
        &self,
        grantee_id: UserId,
        status: Option<ShareStatus>,
    ) -> Result<Vec<Share>, SharingError> {
        Ok(self.backend.shares_for_grantee(&grantee_id, status).await?)
    }

    /// Shares created by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] on store failure.
    pub async fn find_shares_for_owner(&self, owner_id: UserId) -> Result<Vec<Share>, SharingError> {
        Ok(self.backend.shares_for_owner(&owner_id).await?)
    }

    /// The tasks behind `shares`, paired with their share. Shares whose task
    /// has disappeared are skipped.
    pub(crate) async fn with_tasks(
        &self,
        shares: Vec<Share>,
    ) -> Result<Vec<(Share, Task)>, SharingError> {
        let ids: Vec<TaskId> = shares.iter().map(|s| s.task_id).collect();
        let tasks = self.backend.tasks_by_ids(&ids).await?;
        Ok(shares
            .into_iter()
            .filter_map(|share| {
                let task = tasks.iter().find(|t| t.id == share.task_id)?.clone();
                Some((share, task))
            })
            .collect())
    }

    /// Display identity for `user`, with placeholders for missing profiles.
    pub(crate) async fn summary(&self, user: UserId) -> Result<UserSummary, SharingError> {
        Ok(self
            .backend
            .get_profile(&user)
            .await?
            .map_or_else(|| UserSummary::unknown(user), |p| UserSummary::from(&p)))
    }
}
