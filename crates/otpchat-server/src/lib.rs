//! otpchat server.
//!
//! One-time-pad messaging over HTTP. Every message is XORed with a fresh
//! random key of the same length; the key is returned to the sender once and
//! delivered to the recipient once, after which it is marked used and never
//! served again.
//!
//! # Architecture
//!
//! ```text
//! HTTP (axum) ──► Authenticator ──► TokenVerifier (JWKS / local HS256)
//!      │                │
//!      │                └──► Storage::get_or_create_user
//!      ▼
//! MessagingService ──► IdentityResolver (local table / management API)
//!      │
//!      └──► Storage (memory / redb): store_message, claim_inbox
//! ```
//!
//! Protocol logic is generic over [`Storage`] and [`Environment`], so tests
//! drive it with a seeded RNG, a controllable clock and fault-injecting
//! storage.
//!
//! # Components
//!
//! - [`Server`]: binds the listener and serves the router until Ctrl-C
//! - [`MessagingService`]: send and inbox operations
//! - [`Authenticator`]: bearer token → local user
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod env;
mod error;
pub mod http;
pub mod identity;
pub mod messaging;
pub mod storage;
mod system_env;

use std::{fmt, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

pub use auth::{AuthError, AuthenticatedUser, Authenticator, TokenVerifier};
use auth::{HttpJwksSource, JwksCache, ProviderSettings};
use axum::Router;
pub use env::Environment;
pub use error::ServerError;
pub use http::{ApiError, AppState, router};
use identity::{IdentityResolver, LocalDirectory, ManagementConfig, ManagementDirectory};
pub use messaging::{MessageLimits, MessagingError, MessagingService};
pub use otpchat_crypto::Encoding;
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
use tokio::net::TcpListener;

/// Identity provider tenant used to verify bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Tenant domain, e.g. `tenant.auth0.com`.
    pub domain: String,
    /// API identifier tokens must be minted for.
    pub audience: String,
}

/// Token verification settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// Provider tokens are accepted only when set.
    pub provider: Option<ProviderConfig>,
    /// Local HS256 tokens are accepted only when set.
    pub dev_token_secret: Option<String>,
    /// Minimum spacing of key set refetches triggered by unknown key ids.
    pub jwks_refetch_cooldown: Duration,
    /// Timeout for calls to the provider.
    pub upstream_timeout: Duration,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("provider", &self.provider)
            .field("dev_token_secret", &self.dev_token_secret.as_ref().map(|_| "<redacted>"))
            .field("jwks_refetch_cooldown", &self.jwks_refetch_cooldown)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: None,
            dev_token_secret: None,
            jwks_refetch_cooldown: Duration::from_secs(60),
            upstream_timeout: Duration::from_secs(5),
        }
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8000")
    pub bind_address: String,
    /// redb database file. In-memory storage when `None`.
    pub database_path: Option<PathBuf>,
    /// Plaintext and note limits.
    pub limits: MessageLimits,
    /// Wire encoding of ciphertext and keys.
    pub encoding: Encoding,
    /// Token verification.
    pub auth: AuthConfig,
    /// Recipient lookup through the provider's management API. Local user
    /// table when `None`.
    pub management: Option<ManagementConfig>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            database_path: None,
            limits: MessageLimits::default(),
            encoding: Encoding::default(),
            auth: AuthConfig::default(),
            management: None,
        }
    }
}

/// Assemble the router over `storage` and `env` from configuration.
pub fn build_app<S: Storage, E: Environment>(
    config: &ServerRuntimeConfig,
    storage: S,
    env: E,
) -> Result<Router, ServerError> {
    let mut verifier = TokenVerifier::disabled();

    if let Some(provider) = &config.auth.provider {
        let source = HttpJwksSource::for_domain(&provider.domain, config.auth.upstream_timeout)?;
        let jwks = JwksCache::new(Arc::new(source), env.clone(), config.auth.jwks_refetch_cooldown);
        verifier = verifier
            .with_provider(ProviderSettings::for_domain(&provider.domain, &provider.audience), jwks);
        tracing::info!(domain = %provider.domain, "provider token verification enabled");
    }

    if let Some(secret) = &config.auth.dev_token_secret {
        if secret.is_empty() {
            return Err(ServerError::Config("development token secret is empty".to_string()));
        }
        verifier = verifier.with_dev_secret(secret);
        tracing::warn!("local development tokens enabled");
    }

    if !verifier.is_enabled() {
        tracing::warn!("no token verification configured, every request will be rejected");
    }

    let identity: Arc<dyn IdentityResolver> = match &config.management {
        Some(management) => {
            tracing::info!(base_url = %management.base_url, "recipients resolved via management API");
            Arc::new(ManagementDirectory::new(management.clone(), storage.clone(), env.clone())?)
        },
        None => Arc::new(LocalDirectory::new(storage.clone())),
    };

    let state = AppState {
        auth: Arc::new(Authenticator::new(verifier, storage.clone(), env.clone())),
        messaging: Arc::new(MessagingService::new(storage, env, identity, config.limits)),
        encoding: config.encoding,
    };

    Ok(router(state))
}

/// Production otpchat server.
pub struct Server {
    listener: TcpListener,
    app: Router,
}

impl Server {
    /// Open storage, assemble the router and bind the listener.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();

        let app = match &config.database_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening redb storage");
                build_app(&config, RedbStorage::open(path)?, env)?
            },
            None => {
                tracing::warn!("using in-memory storage, messages are lost on restart");
                build_app(&config, MemoryStorage::new(), env)?
            },
        };

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Transport(format!("cannot bind {}: {e}", config.bind_address))
        })?;

        Ok(Self { listener, app })
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.app).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown requested");
}
