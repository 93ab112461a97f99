//! Sharing relationships, their lifecycle and the permission lattice.
//!
//! A [`Share`] links exactly one task to exactly one grantee. It starts out
//! [`ShareStatus::Pending`] and is answered once by the grantee. Only an
//! accepted share confers access; the level of access is the share's
//! [`PermissionLevel`]. The task owner always holds [`EffectivePermission::Owner`].

use serde::{Deserialize, Serialize};

use crate::ids::{ShareId, TaskId, Timestamp, UserId};

/// Access level granted by a share, ordered by increasing capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Read-only access.
    View,
    /// May change task data.
    Edit,
    /// May change task data and use the task's AI chat.
    Admin,
}

impl PermissionLevel {
    /// Human-readable label used by invitation lists.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::View => "View Only",
            Self::Edit => "Can Edit",
            Self::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Edit => write!(f, "edit"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Lifecycle state of a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    /// Awaiting the grantee's answer.
    Pending,
    /// Grantee accepted; access is in effect.
    Accepted,
    /// Grantee declined.
    Rejected,
}

impl ShareStatus {
    /// Whether no further transition is defined from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    /// Applies a grantee's decision.
    ///
    /// Returns `None` when the share has already been answered: terminal
    /// states have no outgoing transitions.
    #[must_use]
    pub const fn respond(self, decision: ShareDecision) -> Option<Self> {
        match self {
            Self::Pending => Some(decision.target()),
            Self::Accepted | Self::Rejected => None,
        }
    }
}

impl std::fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// The grantee's answer to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareDecision {
    /// Accept the invitation.
    Accepted,
    /// Decline the invitation.
    Rejected,
}

impl ShareDecision {
    /// The status a pending share moves to under this decision.
    #[must_use]
    pub const fn target(self) -> ShareStatus {
        match self {
            Self::Accepted => ShareStatus::Accepted,
            Self::Rejected => ShareStatus::Rejected,
        }
    }
}

/// A grant of access to one task from its owner to another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Unique share identifier.
    pub id: ShareId,
    /// The shared task.
    pub task_id: TaskId,
    /// Owner of the task at the time of sharing.
    pub owner_id: UserId,
    /// The user receiving access.
    pub grantee_id: UserId,
    /// Granted access level.
    pub permission: PermissionLevel,
    /// Lifecycle state.
    pub status: ShareStatus,
    /// When the share was created.
    pub created_at: Timestamp,
    /// When the share was last modified.
    pub updated_at: Timestamp,
}

impl Share {
    /// Creates a fresh pending share.
    #[must_use]
    pub fn pending(
        task_id: TaskId,
        owner_id: UserId,
        grantee_id: UserId,
        permission: PermissionLevel,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: ShareId::new(),
            task_id,
            owner_id,
            grantee_id,
            permission,
            status: ShareStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Permission this share confers right now: only accepted shares count.
    #[must_use]
    pub fn granted(&self) -> Option<PermissionLevel> {
        (self.status == ShareStatus::Accepted).then_some(self.permission)
    }
}

/// Access a given user currently holds on a given task. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectivePermission {
    /// No access.
    None,
    /// Read-only.
    View,
    /// May mutate task data.
    Edit,
    /// May mutate task data and chat with the assistant.
    Admin,
    /// The creator; full control.
    Owner,
}

impl EffectivePermission {
    /// Derives the effective permission of `actor` on a task owned by
    /// `task_owner`, given the actor's share on that task (if any).
    ///
    /// A share belonging to someone else, or one that is not accepted,
    /// confers nothing.
    #[must_use]
    pub fn derive(task_owner: UserId, actor: UserId, share: Option<&Share>) -> Self {
        if actor == task_owner {
            return Self::Owner;
        }
        share
            .filter(|s| s.grantee_id == actor)
            .and_then(Share::granted)
            .map_or(Self::None, Self::from)
    }

    /// True for the owner and for accepted `edit`/`admin` grantees.
    #[must_use]
    pub const fn can_mutate(self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Edit)
    }

    /// True for the owner and for accepted `admin` grantees only.
    ///
    /// Stricter than [`can_mutate`](Self::can_mutate): talking to the
    /// assistant on the owner's behalf is not the same as editing data.
    #[must_use]
    pub const fn can_chat(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    /// True for any access at all.
    #[must_use]
    pub const fn can_view(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl From<PermissionLevel> for EffectivePermission {
    fn from(level: PermissionLevel) -> Self {
        match level {
            PermissionLevel::View => Self::View,
            PermissionLevel::Edit => Self::Edit,
            PermissionLevel::Admin => Self::Admin,
        }
    }
}

impl std::fmt::Display for EffectivePermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::View => write!(f, "view"),
            Self::Edit => write!(f, "edit"),
            Self::Admin => write!(f, "admin"),
            Self::Owner => write!(f, "owner"),
        }
    }
}
