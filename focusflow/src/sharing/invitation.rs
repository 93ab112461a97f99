//! The grantee's side of a share: answering an invitation.
//!
//! ```text
//!            respond(accepted)
//!   pending ──────────────────▶ accepted
//!      │
//!      │     respond(rejected)
//!      └──────────────────────▶ rejected
//! ```
//!
//! Only the grantee may respond, and only once. The final write is a
//! compare-and-set on `(share, grantee, pending)`, so a second answer racing
//! the first, or a revoke racing either, cannot slip through between the
//! read and the write.

use std::sync::Arc;

use focusflow_proto::activity::ActivityType;
use focusflow_proto::ids::{ShareId, UserId};
use focusflow_proto::share::{Share, ShareDecision};
use serde_json::json;

use super::{ActivityRecorder, SharingError};
use crate::backend::{ActivityStore, ShareStore};

/// Applies grantee decisions to pending shares.
pub struct InvitationWorkflow<B> {
    backend: Arc<B>,
    recorder: Arc<ActivityRecorder<B>>,
}

impl<B> Clone for InvitationWorkflow<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            recorder: Arc::clone(&self.recorder),
        }
    }
}

impl<B: ShareStore + ActivityStore> InvitationWorkflow<B> {
    /// Creates a workflow over `backend`, logging through `recorder`.
    pub const fn new(backend: Arc<B>, recorder: Arc<ActivityRecorder<B>>) -> Self {
        Self { backend, recorder }
    }

    /// Answers invitation `share_id` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`SharingError::NotFound`] if the share does not exist.
    /// - [`SharingError::Forbidden`] if `caller` is not its grantee.
    /// - [`SharingError::InvalidState`] if it was already answered; the
    ///   share keeps its status.
    /// - [`SharingError::Transient`] on store failure.
    pub async fn respond(
        &self,
        caller: UserId,
        share_id: ShareId,
        decision: ShareDecision,
    ) -> Result<Share, SharingError> {
        let share = self.load_for(caller, share_id).await?;
        let Some(target) = share.status.respond(decision) else {
            return Err(SharingError::InvalidState {
                share_id,
                status: share.status,
            });
        };

        let Some(updated) = self
            .backend
            .transition_share(&share_id, &caller, share.status, target)
            .await?
        else {
            // Lost a race: report whatever the row looks like now.
            let current = self.load_for(caller, share_id).await?;
            return Err(SharingError::InvalidState {
                share_id,
                status: current.status,
            });
        };

        tracing::info!(
            share_id = %share_id,
            task_id = %updated.task_id,
            from = %share.status,
            to = %updated.status,
            "invitation answered"
        );
        self.recorder
            .record(
                updated.task_id,
                caller,
                ActivityType::StatusChange,
                json!({
                    "share_id": share_id,
                    "old_status": share.status,
                    "new_status": updated.status,
                }),
            )
            .await;
        Ok(updated)
    }

    /// Reads a share and checks that `caller` is its grantee.
    async fn load_for(&self, caller: UserId, share_id: ShareId) -> Result<Share, SharingError> {
        let share = self
            .backend
            .get_share(&share_id)
            .await?
            .ok_or_else(|| SharingError::NotFound("invitation".to_string()))?;
        if share.grantee_id != caller {
            tracing::warn!(share_id = %share_id, caller = %caller, "respond by non-grantee rejected");
            return Err(SharingError::Forbidden(
                "only the invited user can respond".to_string(),
            ));
        }
        Ok(share)
    }
}
