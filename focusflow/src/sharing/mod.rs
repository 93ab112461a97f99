//! Task sharing: who may see and change which task.
//!
//! Components, leaves first:
//!
//! - [`IdentityResolver`] maps an e-mail address to a registered user.
//! - [`ShareLedger`] owns the sharing relationships.
//! - [`AccessEvaluator`] derives a user's effective permission on a task.
//! - [`InvitationWorkflow`] lets a grantee answer an invitation, once.
//! - [`ActivityRecorder`] appends an audit record for every ledger mutation
//!   and never lets a logging failure reach the caller.
//! - [`SharingViews`] builds the read-side projections (pending invitations,
//!   shared-with-me, the owner's shared-with panel) and refreshes them after
//!   every mutating action.

pub mod access;
pub mod activity;
pub mod identity;
pub mod invitation;
pub mod ledger;
pub mod views;

pub use access::AccessEvaluator;
pub use activity::{ActivityRecorder, ActivityWarning};
pub use identity::IdentityResolver;
pub use invitation::InvitationWorkflow;
pub use ledger::{ShareEntry, ShareLedger};
pub use views::{PendingInvitation, SharedTask, SharingSnapshot, SharingViews};

use focusflow_proto::ids::ShareId;
use focusflow_proto::share::ShareStatus;

use crate::backend::BackendError;

/// Generic text shown for failures the user can only retry.
pub const RETRY_MESSAGE: &str = "Something went wrong. Try again.";

/// Errors surfaced by sharing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SharingError {
    /// A task, user or share does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The caller lacks the permission the operation requires.
    #[error("not allowed: {0}")]
    Forbidden(String),

    /// The invitation has already been answered.
    #[error("invitation {share_id} was already {status}")]
    InvalidState {
        /// The share that was addressed.
        share_id: ShareId,
        /// Its current (terminal) status.
        status: ShareStatus,
    },

    /// A uniqueness rule was violated, or a lookup was ambiguous.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An identical action is still in flight.
    #[error("this action is already in progress")]
    Busy,

    /// The store could not be reached or failed; the action may be retried.
    #[error("transient failure: {0}")]
    Transient(BackendError),
}

impl SharingError {
    /// Whether retrying the same action may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Text suitable for showing to the user.
    ///
    /// Store failures collapse to [`RETRY_MESSAGE`]; everything else is
    /// specific enough to show as is.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transient(_) => RETRY_MESSAGE.to_string(),
            Self::NotFound(what) => format!("We couldn't find that {what}."),
            Self::Forbidden(_) => "You don't have permission to do that.".to_string(),
            Self::InvalidState { status, .. } => {
                format!("This invitation was already {status}.")
            }
            other => other.to_string(),
        }
    }
}

impl From<BackendError> for SharingError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Duplicate(what) => Self::Conflict(what),
            other => Self::Transient(other),
        }
    }
}
