//! Identity resolution through the identity provider's management API.
//!
//! Recipients exist if the provider knows their email, even if they have
//! never logged in here. Found recipients are provisioned in local storage so
//! messages can reference them by local id.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{IdentityError, IdentityResolver, UserProfile};
use crate::{
    env::Environment,
    storage::{Storage, UserId},
};

/// Management tokens are refreshed this long before the provider expires them.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Connection settings for the management API.
#[derive(Clone)]
pub struct ManagementConfig {
    /// Provider origin, e.g. `https://tenant.auth0.com`. No trailing slash.
    pub base_url: String,
    /// Client-credentials application id.
    pub client_id: String,
    /// Client-credentials application secret.
    pub client_secret: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for ManagementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ManagementConfig {
    /// Settings for a provider tenant domain (`tenant.auth0.com`).
    pub fn for_domain(
        domain: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: format!("https://{}", domain.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url)
    }

    fn audience(&self) -> String {
        format!("{}/api/v2/", self.base_url)
    }

    fn users_by_email_url(&self) -> String {
        format!("{}/api/v2/users-by-email", self.base_url)
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ProviderUser {
    user_id: String,
}

struct CachedToken {
    access_token: String,
    refresh_at_secs: u64,
}

/// [`IdentityResolver`] backed by the management API plus local storage.
///
/// Profiles are always served from local storage: every user this directory
/// has resolved was provisioned there.
pub struct ManagementDirectory<S: Storage, E: Environment> {
    config: ManagementConfig,
    http: reqwest::Client,
    storage: S,
    env: E,
    token: Mutex<Option<CachedToken>>,
}

impl<S: Storage, E: Environment> ManagementDirectory<S, E> {
    /// Create a directory. Fails only if the HTTP client cannot be built.
    pub fn new(config: ManagementConfig, storage: S, env: E) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IdentityError::Upstream(format!("http client: {e}")))?;

        Ok(Self { config, http, storage, env, token: Mutex::new(None) })
    }

    /// Current management token, fetching a new one if the cached one is
    /// absent or about to expire.
    async fn management_token(&self) -> Result<String, IdentityError> {
        let mut cached = self.token.lock().await;
        let now = self.env.wall_clock_secs();

        if let Some(token) = cached.as_ref().filter(|t| now < t.refresh_at_secs) {
            return Ok(token.access_token.clone());
        }

        let audience = self.config.audience();
        let request = TokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            audience: &audience,
            grant_type: "client_credentials",
        };

        let response = self
            .http
            .post(self.config.token_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(format!("token request: {e}")))?;

        if !response.status().is_success() {
            return Err(IdentityError::Upstream(format!(
                "token request rejected with status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Upstream(format!("token response: {e}")))?;

        tracing::debug!(expires_in = body.expires_in, "fetched management token");

        let refresh_at_secs =
            now.saturating_add(body.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));
        let access_token = body.access_token.clone();
        *cached = Some(CachedToken { access_token: body.access_token, refresh_at_secs });

        Ok(access_token)
    }

    async fn provider_has_user(&self, email: &str) -> Result<bool, IdentityError> {
        let token = self.management_token().await?;

        let response = self
            .http
            .get(self.config.users_by_email_url())
            .bearer_auth(token)
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(format!("user lookup: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; the next lookup fetches a fresh one.
            *self.token.lock().await = None;
        }
        if !status.is_success() {
            return Err(IdentityError::Upstream(format!("user lookup rejected with status {status}")));
        }

        let users: Vec<ProviderUser> = response
            .json()
            .await
            .map_err(|e| IdentityError::Upstream(format!("user lookup response: {e}")))?;

        if let Some(user) = users.first() {
            tracing::debug!(provider_user = %user.user_id, "provider knows recipient");
        }
        Ok(!users.is_empty())
    }
}

#[async_trait]
impl<S: Storage, E: Environment> IdentityResolver for ManagementDirectory<S, E> {
    async fn resolve_user_id_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserId>, IdentityError> {
        if let Some(user) = self.storage.find_user_by_email(email)? {
            return Ok(user.is_active.then_some(user.id));
        }

        if !self.provider_has_user(email).await? {
            return Ok(None);
        }

        let user = self.storage.get_or_create_user(email, self.env.wall_clock_secs())?;
        Ok(user.is_active.then_some(user.id))
    }

    async fn resolve_user_profile(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserProfile>, IdentityError> {
        let user = self.storage.load_user(user_id)?;
        Ok(user.map(|u| UserProfile { user_id: u.id, email: u.email }))
    }
}
