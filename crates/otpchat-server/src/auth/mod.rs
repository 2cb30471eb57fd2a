//! Request authentication.
//!
//! `Authorization: Bearer <token>` → verified claims → local user record.
//! Users are provisioned on first successful login and must be active.

mod claims;
mod jwks;
mod local;
mod verifier;

pub use claims::VerifiedClaims;
pub use jwks::{HttpJwksSource, JwksCache, JwksSource};
pub use local::{DEFAULT_DEV_TOKEN_TTL, issue_dev_token};
use thiserror::Error;
pub use verifier::{ProviderSettings, TokenVerifier};

use crate::{
    env::Environment,
    identity::{is_valid_email, normalize_email},
    storage::{Storage, StorageError, UserId},
};

/// Authentication failures.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No `Authorization: Bearer` header.
    #[error("missing bearer token")]
    MissingToken,

    /// Token failed verification (signature, expiry, audience, issuer, format).
    #[error("invalid token")]
    InvalidToken,

    /// Provider says the email address is unverified.
    #[error("email not verified")]
    EmailNotVerified,

    /// Verified token without a usable email claim.
    #[error("email claim missing")]
    MissingEmail,

    /// Account is deactivated.
    #[error("inactive user")]
    InactiveUser,

    /// Key set could not be fetched or used.
    ///
    /// Transient: the provider may be reachable again later.
    #[error("key set unavailable: {0}")]
    Jwks(String),

    /// Authentication is misconfigured.
    #[error("authentication misconfigured: {0}")]
    Config(String),

    /// User lookup or provisioning failed.
    #[error("user storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Returns true if the same request may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Jwks(_) => true,
            Self::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// The caller of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Local user id.
    pub id: UserId,
    /// Normalised email.
    pub email: String,
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively; an empty token counts as missing.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    let value = authorization.ok_or(AuthError::MissingToken)?.trim();
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingToken);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Turns `Authorization` headers into local users.
pub struct Authenticator<S: Storage, E: Environment> {
    verifier: TokenVerifier<E>,
    storage: S,
    env: E,
}

impl<S: Storage, E: Environment> Authenticator<S, E> {
    /// Create an authenticator.
    pub fn new(verifier: TokenVerifier<E>, storage: S, env: E) -> Self {
        Self { verifier, storage, env }
    }

    /// Authenticate a request from its `Authorization` header value.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthenticatedUser, AuthError> {
        let token = bearer_token(authorization)?;
        let claims = self.verifier.verify(token).await?;

        if !claims.email_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let email = claims.email.as_deref().map(normalize_email).ok_or(AuthError::MissingEmail)?;
        if !is_valid_email(&email) {
            return Err(AuthError::MissingEmail);
        }

        let user = self.storage.get_or_create_user(&email, self.env.wall_clock_secs())?;
        if !user.is_active {
            tracing::info!(user_id = user.id, "rejected inactive user");
            return Err(AuthError::InactiveUser);
        }

        Ok(AuthenticatedUser { id: user.id, email: user.email })
    }
}
