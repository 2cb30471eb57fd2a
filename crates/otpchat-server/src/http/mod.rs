//! HTTP surface (axum).

mod error;
mod messages;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
pub use error::ApiError;
pub use messages::{InboxItemResponse, MessageContent, SendMessageBody, SentMessageResponse};
use otpchat_crypto::Encoding;
use serde::{Deserialize, Serialize};

use crate::{auth::Authenticator, env::Environment, messaging::MessagingService, storage::Storage};

/// Shared state of every handler.
pub struct AppState<S: Storage, E: Environment> {
    /// Request authentication.
    pub auth: Arc<Authenticator<S, E>>,
    /// Send and inbox operations.
    pub messaging: Arc<MessagingService<S, E>>,
    /// Wire encoding of ciphertext and keys.
    pub encoding: Encoding,
}

impl<S: Storage, E: Environment> Clone for AppState<S, E> {
    fn clone(&self) -> Self {
        Self {
            auth: Arc::clone(&self.auth),
            messaging: Arc::clone(&self.messaging),
            encoding: self.encoding,
        }
    }
}

/// `GET /health` body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Crate version.
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "otpchat".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build the router.
pub fn router<S: Storage, E: Environment>(state: AppState<S, E>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/messages", post(messages::send_message::<S, E>))
        .route("/messages/", post(messages::send_message::<S, E>))
        .route("/messages/inbox", get(messages::inbox::<S, E>))
        .with_state(state)
}
