//! Task mutations behind the access gates.
//!
//! `TaskService` is the write path for task rows. Reads and writes by
//! grantees go through the [`AccessEvaluator`] first, so a grantee can do
//! here exactly what the store's own row policies would let them do.

use std::sync::Arc;

use focusflow_proto::activity::ActivityType;
use focusflow_proto::ids::{TaskId, Timestamp, UserId};
use focusflow_proto::share::EffectivePermission;
use focusflow_proto::task::{NewTask, Task, TaskPatch, TaskStatus, validate_title};
use serde_json::json;

use crate::backend::Backend;
use crate::sharing::{AccessEvaluator, ActivityRecorder, SharingError};

/// Creates, updates and deletes tasks on behalf of a caller.
pub struct TaskService<B> {
    backend: Arc<B>,
    access: AccessEvaluator<B>,
    recorder: Arc<ActivityRecorder<B>>,
}

impl<B> Clone for TaskService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            access: self.access.clone(),
            recorder: Arc::clone(&self.recorder),
        }
    }
}

impl<B: Backend> TaskService<B> {
    /// Creates a service over `backend`, logging through `recorder`.
    pub fn new(backend: Arc<B>, recorder: Arc<ActivityRecorder<B>>) -> Self {
        Self {
            access: AccessEvaluator::new(Arc::clone(&backend)),
            backend,
            recorder,
        }
    }

    /// The evaluator this service gates on.
    pub const fn access(&self) -> &AccessEvaluator<B> {
        &self.access
    }

    /// Creates a task owned by `caller`.
    ///
    /// # Errors
    ///
    /// [`SharingError::InvalidRequest`] for a blank or over-long title;
    /// [`SharingError::Transient`] on store failure.
    pub async fn create_task(&self, caller: UserId, new: NewTask) -> Result<Task, SharingError> {
        let title = new.title.trim().to_string();
        validate_title(&title).map_err(|e| SharingError::InvalidRequest(e.to_string()))?;

        let now = Timestamp::now();
        let task = Task {
            id: TaskId::new(),
            owner_id: caller,
            title,
            description: new.description,
            priority: new.priority,
            category: new.category,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            due_date: new.due_date,
            start_date: new.start_date,
        };
        self.backend.insert_task(&task).await?;

        tracing::info!(task_id = %task.id, owner = %caller, "task created");
        self.recorder
            .record(task.id, caller, ActivityType::Create, json!({ "title": task.title }))
            .await;
        Ok(task)
    }

    /// Fetches a task `caller` may see, with their permission on it.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`] for a missing task, [`SharingError::Forbidden`]
    /// without an accepted share.
    pub async fn get_task(
        &self,
        caller: UserId,
        task_id: TaskId,
    ) -> Result<(Task, EffectivePermission), SharingError> {
        self.access.require_view(task_id, caller).await
    }

    /// Moves a task to `status`. Needs `edit` or better.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`], [`SharingError::Forbidden`] or
    /// [`SharingError::Transient`].
    pub async fn update_status(
        &self,
        caller: UserId,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<Task, SharingError> {
        let (mut task, _) = self.access.require_mutate(task_id, caller).await?;
        let old = task.status;
        if old == status {
            return Ok(task);
        }
        task.status = status;
        task.updated_at = Timestamp::now();
        self.store(&task).await?;

        tracing::info!(task_id = %task.id, %old, new = %status, "task status changed");
        self.recorder
            .record(
                task.id,
                caller,
                ActivityType::Update,
                json!({ "field": "status", "old": old, "new": status }),
            )
            .await;
        Ok(task)
    }

    /// Applies a partial update to a task's descriptive fields. Needs `edit`
    /// or better.
    ///
    /// # Errors
    ///
    /// [`SharingError::InvalidRequest`] for an invalid title, otherwise as
    /// for [`update_status`](Self::update_status).
    pub async fn update_details(
        &self,
        caller: UserId,
        task_id: TaskId,
        patch: TaskPatch,
    ) -> Result<Task, SharingError> {
        if let Some(title) = &patch.title {
            validate_title(title.trim()).map_err(|e| SharingError::InvalidRequest(e.to_string()))?;
        }
        let (mut task, _) = self.access.require_mutate(task_id, caller).await?;
        if patch.is_empty() {
            return Ok(task);
        }

        let before = json!({
            "title": task.title,
            "description": task.description,
            "priority": task.priority,
            "category": task.category,
        });
        if let Some(title) = patch.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(category) = patch.category {
            task.category = category;
        }
        task.updated_at = Timestamp::now();
        self.store(&task).await?;

        tracing::info!(task_id = %task.id, "task details updated");
        self.recorder
            .record(
                task.id,
                caller,
                ActivityType::Update,
                json!({
                    "field": "details",
                    "old": before,
                    "new": {
                        "title": task.title,
                        "description": task.description,
                        "priority": task.priority,
                        "category": task.category,
                    },
                }),
            )
            .await;
        Ok(task)
    }

    /// Deletes a task and every share of it. Owner only.
    ///
    /// # Errors
    ///
    /// [`SharingError::NotFound`], [`SharingError::Forbidden`] or
    /// [`SharingError::Transient`].
    pub async fn delete_task(&self, caller: UserId, task_id: TaskId) -> Result<Task, SharingError> {
        self.access.require_owner(task_id, caller).await?;
        let (task, removed) = self
            .backend
            .delete_task(&task_id)
            .await?
            .ok_or_else(|| SharingError::NotFound("task".to_string()))?;

        tracing::info!(task_id = %task.id, shares = removed.len(), "task deleted");
        for share in &removed {
            self.recorder
                .record(
                    task.id,
                    caller,
                    ActivityType::Unshare,
                    json!({
                        "share_id": share.id,
                        "grantee_id": share.grantee_id,
                        "permission": share.permission,
                        "status": share.status,
                    }),
                )
                .await;
        }
        self.recorder
            .record(task.id, caller, ActivityType::Delete, json!({ "title": task.title }))
            .await;
        Ok(task)
    }

    /// Tasks owned by `caller`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::Transient`] on store failure.
    pub async fn list_own_tasks(&self, caller: UserId) -> Result<Vec<Task>, SharingError> {
        Ok(self.backend.tasks_for_owner(&caller).await?)
    }

    async fn store(&self, task: &Task) -> Result<(), SharingError> {
        if self.backend.update_task(task).await? {
            Ok(())
        } else {
            // Deleted between the permission check and the write.
            Err(SharingError::NotFound("task".to_string()))
        }
    }
}
