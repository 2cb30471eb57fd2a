//! Identity resolution against the local user table.

use async_trait::async_trait;

use super::{IdentityError, IdentityResolver, UserProfile};
use crate::storage::{Storage, UserId};

/// Resolves users from storage only.
///
/// A user exists once they have authenticated at least once (auto-provisioned
/// on first login). Inactive users resolve as absent.
#[derive(Clone)]
pub struct LocalDirectory<S: Storage> {
    storage: S,
}

impl<S: Storage> LocalDirectory<S> {
    /// Create a directory over `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: Storage> IdentityResolver for LocalDirectory<S> {
    async fn resolve_user_id_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserId>, IdentityError> {
        let user = self.storage.find_user_by_email(email)?;
        Ok(user.filter(|u| u.is_active).map(|u| u.id))
    }

    async fn resolve_user_profile(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, IdentityError> {
        let user = self.storage.load_user(user_id)?;
        Ok(user.map(|u| UserProfile { user_id: u.id, email: u.email }))
    }
}
