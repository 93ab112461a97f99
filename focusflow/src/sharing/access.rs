//! Effective-permission lookup and the gates built on it.
//!
//! The rules mirror the store's row policies exactly: the owner has full
//! control, an accepted grantee has their share's level, everyone else has
//! nothing. Mutating a task needs `edit` or better; the task's assistant
//! chat needs `admin`.

use std::sync::Arc;

use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::share::EffectivePermission;
use focusflow_proto::task::Task;

use super::SharingError;
use crate::backend::{ShareStore, TaskStore};

/// Derives what a user may do with a task.
pub struct AccessEvaluator<B> {
    backend: Arc<B>,
}

impl<B> Clone for AccessEvaluator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: TaskStore + ShareStore> AccessEvaluator<B> {
    /// Creates an evaluator reading from `backend`.
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// The permission `actor` currently holds on `task`.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] if the share lookup fails.
    pub async fn effective_permission(
        &self,
        task: &Task,
        actor: UserId,
    ) -> Result<EffectivePermission, SharingError> {
        if task.owner_id == actor {
            return Ok(EffectivePermission::Owner);
        }
        let share = self.backend.find_share(&task.id, &actor).await?;
        Ok(EffectivePermission::derive(task.owner_id, actor, share.as_ref()))
    }

    /// Loads a task and `actor`'s permission on it.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::NotFound`] if the task does not exist.
    pub async fn permission_for(
        &self,
        task_id: TaskId,
        actor: UserId,
    ) -> Result<(Task, EffectivePermission), SharingError> {
        let task = self
            .backend
            .get_task(&task_id)
            .await?
            .ok_or_else(|| SharingError::NotFound("task".to_string()))?;
        let permission = self.effective_permission(&task, actor).await?;
        Ok((task, permission))
    }

    /// True iff `actor` owns `task` or holds `edit`/`admin` on it.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] if the share lookup fails.
    pub async fn can_mutate(&self, task: &Task, actor: UserId) -> Result<bool, SharingError> {
        Ok(self.effective_permission(task, actor).await?.can_mutate())
    }

    /// True iff `actor` owns `task` or holds `admin` on it.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] if the share lookup fails.
    pub async fn can_chat(&self, task: &Task, actor: UserId) -> Result<bool, SharingError> {
        Ok(self.effective_permission(task, actor).await?.can_chat())
    }

    /// Loads a task `actor` may see.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] for a missing task, [`SharingError::Forbidden`]
    /// if `actor` has no access.
    pub async fn require_view(
        &self,
        task_id: TaskId,
        actor: UserId,
    ) -> Result<(Task, EffectivePermission), SharingError> {
        self.require(task_id, actor, EffectivePermission::can_view, "view this task")
            .await
    }

    /// Loads a task `actor` may change.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] for a missing task, [`SharingError::Forbidden`]
    /// below `edit`.
    pub async fn require_mutate(
        &self,
        task_id: TaskId,
        actor: UserId,
    ) -> Result<(Task, EffectivePermission), SharingError> {
        self.require(task_id, actor, EffectivePermission::can_mutate, "edit this task")
            .await
    }

    /// Loads a task whose assistant chat `actor` may use.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] for a missing task, [`SharingError::Forbidden`]
    /// below `admin`.
    pub async fn require_chat(
        &self,
        task_id: TaskId,
        actor: UserId,
    ) -> Result<(Task, EffectivePermission), SharingError> {
        self.require(task_id, actor, EffectivePermission::can_chat, "use this task's chat")
            .await
    }

    /// Loads a task `actor` owns.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] for a missing task, [`SharingError::Forbidden`]
    /// for anyone but the owner.
    pub async fn require_owner(&self, task_id: TaskId, actor: UserId) -> Result<Task, SharingError> {
        let task = self
            .backend
            .get_task(&task_id)
            .await?
            .ok_or_else(|| SharingError::NotFound("task".to_string()))?;
        if task.owner_id != actor {
            tracing::warn!(task_id = %task_id, actor = %actor, "non-owner attempted an owner action");
            return Err(SharingError::Forbidden("only the task owner can do this".to_string()));
        }
        Ok(task)
    }

    async fn require(
        &self,
        task_id: TaskId,
        actor: UserId,
        allowed: fn(EffectivePermission) -> bool,
        action: &str,
    ) -> Result<(Task, EffectivePermission), SharingError> {
        let (task, permission) = self.permission_for(task_id, actor).await?;
        if !allowed(permission) {
            tracing::warn!(
                task_id = %task_id,
                actor = %actor,
                permission = %permission,
                "rejected: cannot {action}"
            );
            return Err(SharingError::Forbidden(format!(
                "{permission} access cannot {action}"
            )));
        }
        Ok((task, permission))
    }
}
