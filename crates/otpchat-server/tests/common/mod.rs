//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use otpchat_server::{
    AppState, Authenticator, Encoding, Environment, MessageLimits, MessagingService, Storage,
    TokenVerifier,
    auth::{AuthenticatedUser, DEFAULT_DEV_TOKEN_TTL, issue_dev_token},
    identity::{IdentityError, IdentityResolver, LocalDirectory, UserProfile},
    router,
    storage::UserId,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tower::ServiceExt;

pub const DEV_SECRET: &str = "integration-test-secret";

/// Deterministic environment: seeded RNG, manually advanced clock.
#[derive(Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    clock: Arc<AtomicU64>,
}

impl SeededEnv {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            clock: Arc::new(AtomicU64::new(1_700_000_000)),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Environment for SeededEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }
}

/// Resolver that fails every lookup with an upstream error.
pub struct UnreachableDirectory;

#[async_trait]
impl IdentityResolver for UnreachableDirectory {
    async fn resolve_user_id_by_email(
        &self,
        _email: &str,
    ) -> Result<Option<UserId>, IdentityError> {
        Err(IdentityError::Upstream("connection refused".to_string()))
    }

    async fn resolve_user_profile(
        &self,
        _user_id: UserId,
    ) -> Result<Option<UserProfile>, IdentityError> {
        Err(IdentityError::Upstream("connection refused".to_string()))
    }
}

/// Messaging service over the local directory.
pub fn service<S: Storage>(storage: S, env: SeededEnv) -> MessagingService<S, SeededEnv> {
    let identity = Arc::new(LocalDirectory::new(storage.clone()));
    MessagingService::new(storage, env, identity, MessageLimits::default())
}

/// Provision `email` and return it as an authenticated caller.
pub fn user<S: Storage>(storage: &S, email: &str) -> AuthenticatedUser {
    let stored = storage.get_or_create_user(email, 0).unwrap();
    AuthenticatedUser { id: stored.id, email: stored.email }
}

/// Router accepting local tokens signed with [`DEV_SECRET`].
pub fn app<S: Storage>(storage: S, env: SeededEnv, encoding: Encoding) -> Router {
    let verifier = TokenVerifier::disabled().with_dev_secret(DEV_SECRET);
    let state = AppState {
        auth: Arc::new(Authenticator::new(verifier, storage.clone(), env.clone())),
        messaging: Arc::new(service(storage, env)),
        encoding,
    };
    router(state)
}

pub fn dev_token(email: &str) -> String {
    issue_dev_token(DEV_SECRET, email, DEFAULT_DEV_TOKEN_TTL).unwrap()
}

/// Send a request through the router and decode the JSON response.
pub async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
