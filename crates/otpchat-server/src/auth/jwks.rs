//! JWKS retrieval and caching.
//!
//! The key set is fetched on first use and reused. A token naming a `kid` the
//! cached set lacks triggers a refetch (the provider may have rotated keys),
//! but at most once per cooldown window.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, jwk::JwkSet};
use tokio::sync::RwLock;

use super::AuthError;
use crate::env::Environment;

/// Where a key set comes from.
#[async_trait]
pub trait JwksSource: Send + Sync + 'static {
    /// Fetch the current key set.
    async fn fetch(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches the key set over HTTPS.
pub struct HttpJwksSource {
    url: String,
    http: reqwest::Client,
}

impl HttpJwksSource {
    /// Source reading `url`, with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("http client: {e}")))?;
        Ok(Self { url: url.into(), http })
    }

    /// Well-known key set location for a provider tenant domain.
    pub fn for_domain(domain: &str, timeout: Duration) -> Result<Self, AuthError> {
        Self::new(format!("https://{}/.well-known/jwks.json", domain.trim_end_matches('/')), timeout)
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::Jwks(format!("fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Jwks(format!("fetch rejected with status {status}")));
        }

        response.json().await.map_err(|e| AuthError::Jwks(format!("malformed key set: {e}")))
    }
}

#[derive(Default)]
struct CacheState {
    keys: Option<JwkSet>,
    /// Time of the last fetch attempt, successful or not.
    last_fetch_secs: Option<u64>,
}

/// Cached key set with rate-limited refetch.
pub struct JwksCache<E: Environment> {
    source: Arc<dyn JwksSource>,
    env: E,
    refetch_cooldown_secs: u64,
    state: RwLock<CacheState>,
}

impl<E: Environment> JwksCache<E> {
    /// Cache over `source`. Refetches for unknown key ids are spaced at least
    /// `refetch_cooldown` apart.
    pub fn new(source: Arc<dyn JwksSource>, env: E, refetch_cooldown: Duration) -> Self {
        Self {
            source,
            env,
            refetch_cooldown_secs: refetch_cooldown.as_secs(),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Decoding key for `kid`, fetching the key set if needed.
    ///
    /// `Ok(None)` means the key id is unknown even after the permitted
    /// refetch. `Err(Jwks)` means the set could not be obtained at all.
    pub async fn get_or_fetch(&self, kid: &str) -> Result<Option<DecodingKey>, AuthError> {
        {
            let state = self.state.read().await;
            if let Some(key) = lookup(state.keys.as_ref(), kid)? {
                return Ok(Some(key));
            }
        }

        let mut state = self.state.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(key) = lookup(state.keys.as_ref(), kid)? {
            return Ok(Some(key));
        }

        let now = self.env.wall_clock_secs();
        let cooling_down = state
            .last_fetch_secs
            .is_some_and(|last| now < last.saturating_add(self.refetch_cooldown_secs));
        if cooling_down {
            if state.keys.is_none() {
                return Err(AuthError::Jwks("key set unavailable".to_string()));
            }
            tracing::debug!(kid, "unknown key id within refetch cooldown");
            return Ok(None);
        }

        state.last_fetch_secs = Some(now);
        let keys = self.source.fetch().await?;
        tracing::info!(count = keys.keys.len(), "fetched key set");
        state.keys = Some(keys);

        lookup(state.keys.as_ref(), kid)
    }
}

fn lookup(keys: Option<&JwkSet>, kid: &str) -> Result<Option<DecodingKey>, AuthError> {
    let Some(jwk) = keys.and_then(|set| set.find(kid)) else {
        return Ok(None);
    };
    DecodingKey::from_jwk(jwk)
        .map(Some)
        .map_err(|e| AuthError::Jwks(format!("unusable key {kid}: {e}")))
}
