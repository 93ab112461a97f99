//! E-mail to user resolution.

use std::sync::Arc;

use focusflow_proto::ids::UserId;
use focusflow_proto::user::UserProfile;

use super::SharingError;
use crate::backend::Directory;

/// Maps a human-entered e-mail address to a registered user.
pub struct IdentityResolver<D> {
    directory: Arc<D>,
}

impl<D> Clone for IdentityResolver<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<D: Directory> IdentityResolver<D> {
    /// Creates a resolver over `directory`.
    pub const fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    /// Resolves `email` to a user id.
    ///
    /// # Errors
    ///
    /// See [`resolve_profile`](Self::resolve_profile).
    pub async fn resolve(&self, email: &str) -> Result<UserId, SharingError> {
        self.resolve_profile(email).await.map(|p| p.id)
    }

    /// Resolves `email` to the full directory entry.
    ///
    /// Surrounding whitespace is ignored; otherwise the match is exact.
    ///
    /// # Errors
    ///
    /// - [`SharingError::InvalidRequest`] for a blank address.
    /// - [`SharingError::NotFound`] if no user has this address.
    /// - [`SharingError::Conflict`] if more than one does.
    /// - [`SharingError::Transient`] if the directory fails.
    pub async fn resolve_profile(&self, email: &str) -> Result<UserProfile, SharingError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SharingError::InvalidRequest("email is required".to_string()));
        }
        let mut matches = self.directory.find_users_by_email(email).await?;
        match matches.len() {
            0 => Err(SharingError::NotFound("user".to_string())),
            1 => Ok(matches.remove(0)),
            n => {
                tracing::warn!(candidates = n, "email matches more than one user");
                Err(SharingError::Conflict(format!(
                    "{n} users share the email {email}"
                )))
            }
        }
    }
}
