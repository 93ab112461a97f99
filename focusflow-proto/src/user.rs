//! Registered users as seen by the sharing subsystem.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A directory entry: durable id plus contact details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Durable user identifier.
    pub id: UserId,
    /// Unique e-mail address.
    pub email: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl UserProfile {
    /// Creates a profile with a fresh id.
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            name,
        }
    }
}

/// Denormalized identity carried by list projections.
///
/// Every field is populated: a missing display name falls back to the
/// e-mail address, and an unknown user gets placeholder text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// Durable user identifier.
    pub id: UserId,
    /// E-mail address (empty if the profile is gone).
    pub email: String,
    /// Display name.
    pub name: String,
}

impl UserSummary {
    /// Placeholder for a user whose profile could not be found.
    #[must_use]
    pub fn unknown(id: UserId) -> Self {
        Self {
            id,
            email: String::new(),
            name: "Unknown user".to_string(),
        }
    }
}

impl From<&UserProfile> for UserSummary {
    fn from(profile: &UserProfile) -> Self {
        let name = profile
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&profile.email)
            .to_string();
        Self {
            id: profile.id,
            email: profile.email.clone(),
            name,
        }
    }
}
