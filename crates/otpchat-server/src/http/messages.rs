//! Message routes and their wire types.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::{
    auth::AuthenticatedUser,
    env::Environment,
    messaging::{InboxItem, SendRequest, SentMessage},
    storage::Storage,
};

/// `POST /messages` body. `message` and `subject` are accepted as aliases.
#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    recipient_email: Option<String>,
    #[serde(alias = "message")]
    plaintext: Option<String>,
    #[serde(alias = "subject")]
    note: Option<String>,
}

/// `POST /messages` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SentMessageResponse {
    /// Message id.
    pub id: u64,
    /// Sender email.
    pub sender: String,
    /// Recipient email.
    pub recipient: String,
    /// Encoded ciphertext.
    pub ciphertext: String,
    /// Encoded key.
    pub key: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// Note.
    pub note: Option<String>,
}

/// Ciphertext and key of an inbox entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageContent {
    /// Encoded ciphertext.
    pub ciphertext: String,
    /// Encoded key.
    pub key: String,
}

/// `GET /messages/inbox` entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct InboxItemResponse {
    /// Message id.
    pub id: u64,
    /// Sender email, or `unknown`.
    pub sender_email: String,
    /// Note.
    pub note: Option<String>,
    /// Ciphertext and key.
    pub content: MessageContent,
    /// RFC 3339 timestamp of the send.
    pub time_received: String,
}

async fn authenticate<S: Storage, E: Environment>(
    state: &AppState<S, E>,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, ApiError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    Ok(state.auth.authenticate(authorization).await?)
}

pub(super) async fn send_message<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    headers: HeaderMap,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SentMessageResponse>), ApiError> {
    let sender = authenticate(&state, &headers).await?;
    let Json(body) = body?;

    let recipient_email =
        body.recipient_email.ok_or_else(|| ApiError::bad_request("recipient_email is required"))?;
    let plaintext = body.plaintext.ok_or_else(|| ApiError::bad_request("plaintext is required"))?;

    let sent = state
        .messaging
        .send(&sender, SendRequest { recipient_email, plaintext, note: body.note })
        .await?;

    Ok((StatusCode::CREATED, Json(render_sent(&state, sent))))
}

pub(super) async fn inbox<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    headers: HeaderMap,
) -> Result<Json<Vec<InboxItemResponse>>, ApiError> {
    let reader = authenticate(&state, &headers).await?;
    let items = state.messaging.inbox(&reader).await?;

    Ok(Json(items.into_iter().map(|item| render_inbox_item(&state, item)).collect()))
}

fn render_sent<S: Storage, E: Environment>(
    state: &AppState<S, E>,
    sent: SentMessage,
) -> SentMessageResponse {
    SentMessageResponse {
        id: sent.id,
        sender: sent.sender_email,
        recipient: sent.recipient_email,
        ciphertext: state.encoding.encode(&sent.ciphertext),
        key: sent.key.encode(state.encoding),
        created_at: rfc3339(sent.created_at_secs),
        note: sent.note,
    }
}

fn render_inbox_item<S: Storage, E: Environment>(
    state: &AppState<S, E>,
    item: InboxItem,
) -> InboxItemResponse {
    InboxItemResponse {
        id: item.id,
        sender_email: item.sender_email,
        note: item.note,
        content: MessageContent {
            ciphertext: state.encoding.encode(&item.ciphertext),
            key: item.key.encode(state.encoding),
        },
        time_received: rfc3339(item.created_at_secs),
    }
}

fn rfc3339(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_as_utc() {
        assert_eq!(rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(rfc3339(1_700_000_000), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn body_aliases() {
        let body: SendMessageBody = serde_json::from_str(
            r#"{"recipient_email":"b@example.com","message":"hi","subject":"re"}"#,
        )
        .unwrap();
        assert_eq!(body.plaintext.as_deref(), Some("hi"));
        assert_eq!(body.note.as_deref(), Some("re"));
    }

    #[test]
    fn missing_fields_are_none() {
        let body: SendMessageBody = serde_json::from_str("{}").unwrap();
        assert!(body.recipient_email.is_none());
        assert!(body.plaintext.is_none());
        assert!(body.note.is_none());
    }
}
