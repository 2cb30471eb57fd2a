//! Token payloads and their validated form.

use serde::Deserialize;

use super::AuthError;

/// Payload of a provider-issued token, as decoded.
///
/// Signature, expiry, audience and issuer are checked by the decoder; this
/// struct only holds the claims the server reads afterwards.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProviderClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// Claims of a token that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    /// Token subject (provider user id, or email for local tokens).
    pub subject: String,
    /// Email claim, if the token carried one.
    pub email: Option<String>,
    /// False only when the provider explicitly says the email is unverified.
    pub email_verified: bool,
}

impl TryFrom<ProviderClaims> for VerifiedClaims {
    type Error = AuthError;

    fn try_from(claims: ProviderClaims) -> Result<Self, Self::Error> {
        let subject = claims.sub.filter(|s| !s.is_empty()).ok_or(AuthError::InvalidToken)?;
        Ok(Self {
            subject,
            email: claims.email.filter(|e| !e.trim().is_empty()),
            // Absent means "not asserted", which the provider uses for
            // connections that do not track verification.
            email_verified: claims.email_verified.unwrap_or(true),
        })
    }
}

impl VerifiedClaims {
    /// Claims of a local development token: the subject is the email.
    pub(crate) fn from_local_subject(email: String) -> Self {
        Self { subject: email.clone(), email: Some(email), email_verified: true }
    }
}
