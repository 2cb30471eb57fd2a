//! `ManagementDirectory` against a stand-in identity provider.

mod common;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use common::{SeededEnv, user};
use otpchat_crypto::decrypt;
use otpchat_server::{
    MessageLimits, MessagingService,
    identity::{IdentityError, IdentityResolver, ManagementConfig, ManagementDirectory},
    messaging::SendRequest,
    storage::{MemoryStorage, Storage},
};
use serde_json::{Value, json};

const ACCESS_TOKEN: &str = "management-access-token";

struct FakeProvider {
    known: Vec<String>,
    expires_in: u64,
    token_requests: AtomicUsize,
    lookups: AtomicUsize,
    failing: AtomicBool,
    audience: std::sync::Mutex<Option<String>>,
}

async fn issue_token(
    State(provider): State<Arc<FakeProvider>>,
    Json(body): Json<Value>,
) -> Response {
    provider.token_requests.fetch_add(1, Ordering::SeqCst);
    if provider.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if body["grant_type"] != "client_credentials" || body["client_secret"] != "shh" {
        return StatusCode::FORBIDDEN.into_response();
    }
    *provider.audience.lock().unwrap() = body["audience"].as_str().map(str::to_string);

    Json(json!({
        "access_token": ACCESS_TOKEN,
        "expires_in": provider.expires_in,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn users_by_email(
    State(provider): State<Arc<FakeProvider>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    provider.lookups.fetch_add(1, Ordering::SeqCst);
    if provider.failing.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {ACCESS_TOKEN}"));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let email = query.get("email").cloned().unwrap_or_default();
    let users: Vec<Value> = provider
        .known
        .iter()
        .filter(|known| **known == email)
        .map(|known| json!({"user_id": format!("auth0|{known}"), "email": known}))
        .collect();
    Json(users).into_response()
}

async fn spawn_provider(known: &[&str], expires_in: u64) -> (Arc<FakeProvider>, SocketAddr) {
    let provider = Arc::new(FakeProvider {
        known: known.iter().map(|s| s.to_string()).collect(),
        expires_in,
        token_requests: AtomicUsize::new(0),
        lookups: AtomicUsize::new(0),
        failing: AtomicBool::new(false),
        audience: std::sync::Mutex::new(None),
    });

    let app = Router::new()
        .route("/oauth/token", post(issue_token))
        .route("/api/v2/users-by-email", get(users_by_email))
        .with_state(Arc::clone(&provider));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (provider, addr)
}

fn directory(
    addr: SocketAddr,
    storage: MemoryStorage,
    env: SeededEnv,
) -> ManagementDirectory<MemoryStorage, SeededEnv> {
    let config = ManagementConfig {
        base_url: format!("http://{addr}"),
        client_id: "otpchat".to_string(),
        client_secret: "shh".to_string(),
        timeout: Duration::from_secs(5),
    };
    ManagementDirectory::new(config, storage, env).unwrap()
}

#[tokio::test]
async fn known_recipient_is_provisioned() {
    let (provider, addr) = spawn_provider(&["bob@example.com"], 3_600).await;
    let storage = MemoryStorage::new();
    let directory = directory(addr, storage.clone(), SeededEnv::new(1));

    let id = directory.resolve_user_id_by_email("bob@example.com").await.unwrap().unwrap();
    let stored = storage.find_user_by_email("bob@example.com").unwrap().unwrap();
    assert_eq!(stored.id, id);
    assert!(stored.is_active);

    let profile = directory.resolve_user_profile(id).await.unwrap().unwrap();
    assert_eq!(profile.email, "bob@example.com");

    assert_eq!(
        provider.audience.lock().unwrap().as_deref(),
        Some(format!("http://{addr}/api/v2/").as_str())
    );

    // Already provisioned: no second provider lookup
    directory.resolve_user_id_by_email("bob@example.com").await.unwrap();
    assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_recipient_is_none_and_not_provisioned() {
    let (_provider, addr) = spawn_provider(&["bob@example.com"], 3_600).await;
    let storage = MemoryStorage::new();
    let directory = directory(addr, storage.clone(), SeededEnv::new(2));

    assert_eq!(directory.resolve_user_id_by_email("ghost@example.com").await.unwrap(), None);
    assert!(storage.find_user_by_email("ghost@example.com").unwrap().is_none());
}

#[tokio::test]
async fn management_token_is_cached_until_near_expiry() {
    let (provider, addr) =
        spawn_provider(&["a@example.com", "b@example.com", "c@example.com"], 120).await;
    let env = SeededEnv::new(3);
    let directory = directory(addr, MemoryStorage::new(), env.clone());

    directory.resolve_user_id_by_email("a@example.com").await.unwrap();
    directory.resolve_user_id_by_email("b@example.com").await.unwrap();
    assert_eq!(provider.token_requests.load(Ordering::SeqCst), 1);

    // 120 s lifetime, refreshed 60 s early
    env.advance(61);
    directory.resolve_user_id_by_email("c@example.com").await.unwrap();
    assert_eq!(provider.token_requests.load(Ordering::SeqCst), 2);
    assert_eq!(provider.lookups.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn provider_failure_is_upstream_error() {
    let (provider, addr) = spawn_provider(&["bob@example.com"], 3_600).await;
    provider.failing.store(true, Ordering::SeqCst);
    let storage = MemoryStorage::new();
    let directory = directory(addr, storage.clone(), SeededEnv::new(4));

    let err = directory.resolve_user_id_by_email("bob@example.com").await.unwrap_err();
    assert!(matches!(err, IdentityError::Upstream(_)));
    assert!(err.is_transient());
    assert!(storage.find_user_by_email("bob@example.com").unwrap().is_none());
}

#[tokio::test]
async fn unreachable_provider_is_upstream_error() {
    // Bind and drop to get a port nobody listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let directory = directory(addr, MemoryStorage::new(), SeededEnv::new(5));

    let err = directory.resolve_user_id_by_email("bob@example.com").await.unwrap_err();
    assert!(matches!(err, IdentityError::Upstream(_)));
}

#[tokio::test]
async fn inactive_local_user_is_not_a_recipient() {
    let (provider, addr) = spawn_provider(&["bob@example.com"], 3_600).await;
    let storage = MemoryStorage::new();
    let bob = storage.get_or_create_user("bob@example.com", 0).unwrap();
    storage.set_user_active(bob.id, false).unwrap();
    let directory = directory(addr, storage, SeededEnv::new(6));

    assert_eq!(directory.resolve_user_id_by_email("bob@example.com").await.unwrap(), None);
    assert_eq!(provider.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn message_to_a_recipient_who_never_logged_in() {
    let (_provider, addr) = spawn_provider(&["bob@example.com"], 3_600).await;
    let storage = MemoryStorage::new();
    let env = SeededEnv::new(7);
    let alice = user(&storage, "alice@example.com");
    let messaging = MessagingService::new(
        storage.clone(),
        env.clone(),
        Arc::new(directory(addr, storage.clone(), env)),
        MessageLimits::default(),
    );

    let request = SendRequest {
        recipient_email: "bob@example.com".to_string(),
        plaintext: "welcome".to_string(),
        note: None,
    };
    let sent = messaging.send(&alice, request).await.unwrap();
    assert!(storage.load_message(sent.id).unwrap().is_some());

    // Bob's first login finds the message waiting
    let bob = user(&storage, "bob@example.com");
    let inbox = messaging.inbox(&bob).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(decrypt(&inbox[0].ciphertext, &inbox[0].key).unwrap(), b"welcome");
}
