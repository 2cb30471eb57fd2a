//! HTTP error responses.
//!
//! Every failure renders as `{"error": message}`. Internal details are logged
//! here and replaced by a generic message.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{auth::AuthError, identity::IdentityError, messaging::MessagingError};

/// Status code plus client-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Response `error` field.
    pub message: String,
}

impl ApiError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 502.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::EmailNotVerified
            | AuthError::InactiveUser => Self::unauthorized(err.to_string()),
            AuthError::MissingEmail => Self::bad_request(err.to_string()),
            AuthError::Jwks(detail) => {
                tracing::error!(%detail, "key set unavailable");
                Self::bad_gateway("identity provider unavailable")
            },
            AuthError::Config(detail) => {
                tracing::error!(%detail, "authentication misconfigured");
                Self::internal("internal error")
            },
            AuthError::Storage(err) => {
                tracing::error!(error = %err, "user storage failed during authentication");
                Self::internal("internal error")
            },
        }
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Validation { .. } => Self::bad_request(err.to_string()),
            MessagingError::Identity(IdentityError::Upstream(detail)) => {
                tracing::error!(%detail, "identity provider lookup failed");
                Self::bad_gateway("identity provider unavailable")
            },
            MessagingError::Identity(IdentityError::Storage(err))
            | MessagingError::Storage(err) => {
                tracing::error!(error = %err, "storage failure");
                Self::internal("internal error")
            },
            MessagingError::Crypto(err) => {
                tracing::error!(error = %err, "cipher failure");
                Self::internal("internal error")
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}
