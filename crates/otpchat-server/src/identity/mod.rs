//! Identity resolution: email → user id, user id → profile.
//!
//! The messaging service never looks users up itself. It asks an
//! [`IdentityResolver`], which is either the local user table
//! ([`LocalDirectory`]) or the identity provider's management API backed by
//! the local table ([`ManagementDirectory`]).

mod local;
mod management;

use async_trait::async_trait;
pub use local::LocalDirectory;
pub use management::{ManagementConfig, ManagementDirectory};
use thiserror::Error;

use crate::storage::{StorageError, UserId};

/// Public view of a user, as shown to other users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Local identifier.
    pub user_id: UserId,
    /// Email address.
    pub email: String,
}

/// Errors from identity resolution. Not-found is `Ok(None)`, never an error.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The identity provider could not be reached or answered with an error.
    ///
    /// Transient: the same lookup may succeed later.
    #[error("identity provider unavailable: {0}")]
    Upstream(String),

    /// Local user table failure.
    #[error("identity storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IdentityError {
    /// Returns true if the lookup may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Upstream(_) => true,
            Self::Storage(err) => err.is_transient(),
        }
    }
}

/// Resolves recipients and senders for the messaging service.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// Local id of the active user with this (normalised) email, if any.
    async fn resolve_user_id_by_email(&self, email: &str)
    -> Result<Option<UserId>, IdentityError>;

    /// Profile of the user with this id, if any.
    async fn resolve_user_profile(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, IdentityError>;
}

/// Canonical form of an email address: trimmed, lowercase.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Structural check for an email address.
///
/// Accepts `local@domain.tld` with no whitespace, exactly one `@`, a non-empty
/// local part, and a domain made of non-empty dot-separated labels (at least
/// two). Deliberately permissive beyond that: the identity provider is the
/// authority on which addresses exist.
pub fn is_valid_email(email: &str) -> bool {
    const MAX_EMAIL_LEN: usize = 254;

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return false;
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}
