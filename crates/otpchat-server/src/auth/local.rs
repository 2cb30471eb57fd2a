//! Local development tokens (HS256, `sub` = email).
//!
//! Accepted only when a secret is configured. Intended for running the
//! server without an identity provider.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Lifetime of tokens minted by `--issue-dev-token`.
pub const DEFAULT_DEV_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct DevClaims {
    sub: String,
    exp: u64,
}

/// Mint a local token for `email`, valid for `ttl`.
pub fn issue_dev_token(secret: &str, email: &str, ttl: Duration) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::Config("development token secret is empty".to_string()));
    }

    let claims = DevClaims {
        sub: email.to_string(),
        exp: jsonwebtoken::get_current_timestamp().saturating_add(ttl.as_secs()),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Config(format!("cannot sign development token: {e}")))
}

/// Verifier for local tokens.
#[derive(Clone)]
pub(crate) struct DevTokenKey {
    key: DecodingKey,
    validation: Validation,
}

impl DevTokenKey {
    pub(crate) fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key: DecodingKey::from_secret(secret.as_bytes()), validation }
    }

    /// Subject (email) of a valid local token.
    pub(crate) fn verify(&self, token: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<DevClaims>(token, &self.key, &self.validation)?;
        Ok(data.claims.sub)
    }
}
