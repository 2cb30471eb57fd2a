//! Bearer token verification.
//!
//! Provider tokens (RS256, checked against the JWKS, audience and issuer) are
//! tried first. Local development tokens are the fallback when a secret is
//! configured.

use jsonwebtoken::{Algorithm, Validation};

use super::{AuthError, JwksCache, VerifiedClaims, claims::ProviderClaims, local::DevTokenKey};
use crate::env::Environment;

/// Expected audience and issuer of provider tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// API identifier tokens must be minted for.
    pub audience: String,
    /// Token issuer, `https://{domain}/`.
    pub issuer: String,
}

impl ProviderSettings {
    /// Settings for a provider tenant domain.
    pub fn for_domain(domain: &str, audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            issuer: format!("https://{}/", domain.trim_end_matches('/')),
        }
    }
}

struct ProviderVerifier<E: Environment> {
    jwks: JwksCache<E>,
    validation: Validation,
}

/// Verifies bearer tokens into [`VerifiedClaims`].
pub struct TokenVerifier<E: Environment> {
    provider: Option<ProviderVerifier<E>>,
    dev: Option<DevTokenKey>,
}

impl<E: Environment> TokenVerifier<E> {
    /// Verifier with neither provider nor local tokens. Rejects everything.
    pub fn disabled() -> Self {
        Self { provider: None, dev: None }
    }

    /// Accept provider tokens signed by a key in `jwks`.
    #[must_use]
    pub fn with_provider(mut self, settings: ProviderSettings, jwks: JwksCache<E>) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[settings.audience]);
        validation.set_issuer(&[settings.issuer]);
        self.provider = Some(ProviderVerifier { jwks, validation });
        self
    }

    /// Accept local HS256 tokens signed with `secret`.
    #[must_use]
    pub fn with_dev_secret(mut self, secret: &str) -> Self {
        self.dev = Some(DevTokenKey::new(secret));
        self
    }

    /// True if at least one kind of token can be accepted.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some() || self.dev.is_some()
    }

    /// Verify `token`.
    ///
    /// A JWKS outage surfaces as [`AuthError::Jwks`] unless a local token
    /// verifies instead. Every other failure is [`AuthError::InvalidToken`].
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        let provider_err = match &self.provider {
            Some(provider) => match self.verify_provider(provider, token).await {
                Ok(claims) => return Ok(claims),
                Err(err) => Some(err),
            },
            None => None,
        };

        if let Some(dev) = &self.dev {
            match dev.verify(token) {
                Ok(email) => return Ok(VerifiedClaims::from_local_subject(email)),
                Err(e) => tracing::debug!(reason = %e, "local token rejected"),
            }
        }

        match provider_err {
            Some(err @ AuthError::Jwks(_)) => Err(err),
            _ => Err(AuthError::InvalidToken),
        }
    }

    async fn verify_provider(
        &self,
        provider: &ProviderVerifier<E>,
        token: &str,
    ) -> Result<VerifiedClaims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| {
            tracing::debug!(reason = %e, "malformed token header");
            AuthError::InvalidToken
        })?;

        // Local tokens never reach the key set
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken);
        }
        let kid = header.kid.ok_or(AuthError::InvalidToken)?;

        let Some(key) = provider.jwks.get_or_fetch(&kid).await? else {
            tracing::debug!(kid = %kid, "token signed with unknown key");
            return Err(AuthError::InvalidToken);
        };

        let data = jsonwebtoken::decode::<ProviderClaims>(token, &key, &provider.validation)
            .map_err(|e| {
                tracing::debug!(reason = %e, "provider token rejected");
                AuthError::InvalidToken
            })?;

        VerifiedClaims::try_from(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_has_trailing_slash() {
        let settings = ProviderSettings::for_domain("tenant.example.com", "https://api");
        assert_eq!(settings.issuer, "https://tenant.example.com/");
        assert_eq!(settings.audience, "https://api");
    }
}
