//! Send and inbox operations.
//!
//! # Send
//!
//! ```text
//! validate → resolve recipient → generate key → XOR → persist(key, message)
//! ```
//!
//! Key and message are persisted in one storage transaction. If the
//! recipient does not resolve, the same key generation and encryption run and
//! the same response is built, but nothing is persisted: callers cannot tell
//! registered addresses from unregistered ones.
//!
//! # Inbox
//!
//! One storage transaction selects every message with an unused key and marks
//! those keys used. Senders are resolved afterwards, so a lookup failure can
//! degrade the sender name but never lose the keys.

mod error;
mod limits;

use std::{collections::HashMap, sync::Arc};

pub use error::MessagingError;
pub use limits::MessageLimits;
use otpchat_crypto::{OneTimeKey, encrypt, generate_key};
use zeroize::Zeroizing;

use crate::{
    auth::AuthenticatedUser,
    env::Environment,
    identity::{IdentityResolver, is_valid_email, normalize_email},
    storage::{MessageId, NewMessage, Storage, StorageError, UserId},
};

/// Message ids stay below 2^53 so JSON clients read them exactly.
const MESSAGE_ID_MASK: u64 = (1 << 53) - 1;

/// Attempts to find an unused message id before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

/// Recipient id for rehearsed sends. Storage allocates user ids from 1.
const NO_RECIPIENT: UserId = 0;

/// Sender shown when the sender cannot be resolved.
pub const UNKNOWN_SENDER: &str = "unknown";

/// A send request, as received.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Addressee email (normalised by the service).
    pub recipient_email: String,
    /// Text to encrypt.
    pub plaintext: String,
    /// Optional note, stored in the clear.
    pub note: Option<String>,
}

/// Outcome of a send, returned to the sender only.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Message id.
    pub id: MessageId,
    /// Sender email.
    pub sender_email: String,
    /// Recipient email (normalised).
    pub recipient_email: String,
    /// Encrypted body.
    pub ciphertext: Vec<u8>,
    /// The key. Not retrievable by the sender again.
    pub key: OneTimeKey,
    /// Unix timestamp (seconds).
    pub created_at_secs: u64,
    /// Note.
    pub note: Option<String>,
}

/// A delivered message with its key.
#[derive(Debug, Clone)]
pub struct InboxItem {
    /// Message id.
    pub id: MessageId,
    /// Sender email, or [`UNKNOWN_SENDER`].
    pub sender_email: String,
    /// Note.
    pub note: Option<String>,
    /// Encrypted body.
    pub ciphertext: Vec<u8>,
    /// The key, now marked used.
    pub key: OneTimeKey,
    /// Unix timestamp (seconds) of the send.
    pub created_at_secs: u64,
}

/// Send and inbox operations over storage, identity and environment.
pub struct MessagingService<S: Storage, E: Environment> {
    storage: S,
    env: E,
    identity: Arc<dyn IdentityResolver>,
    limits: MessageLimits,
}

impl<S: Storage, E: Environment> MessagingService<S, E> {
    /// Create a service.
    pub fn new(
        storage: S,
        env: E,
        identity: Arc<dyn IdentityResolver>,
        limits: MessageLimits,
    ) -> Self {
        Self { storage, env, identity, limits }
    }

    /// Configured limits.
    pub fn limits(&self) -> MessageLimits {
        self.limits
    }

    /// Encrypt `request.plaintext` under a fresh key and store it for the
    /// recipient.
    ///
    /// # Errors
    ///
    /// - `Validation` for empty or oversized fields and malformed emails
    /// - `Identity` if the recipient lookup fails (not if it finds nobody)
    /// - `Storage` if persisting fails; nothing is left behind
    pub async fn send(
        &self,
        sender: &AuthenticatedUser,
        request: SendRequest,
    ) -> Result<SentMessage, MessagingError> {
        let recipient_email = normalize_email(&request.recipient_email);
        if recipient_email.is_empty() {
            return Err(MessagingError::validation("recipient_email", "must not be empty"));
        }
        if !is_valid_email(&recipient_email) {
            return Err(MessagingError::validation("recipient_email", "is not a valid email"));
        }
        self.limits.check_plaintext(&request.plaintext)?;
        let note = request.note.filter(|n| !n.is_empty());
        self.limits.check_note(note.as_deref())?;

        let recipient_id = self.identity.resolve_user_id_by_email(&recipient_email).await?;

        let plaintext = request.plaintext.as_bytes();
        let key = generate_key(plaintext.len(), |buf| self.env.random_bytes(buf));
        let ciphertext = encrypt(plaintext, &key)?;
        let created_at_secs = self.env.wall_clock_secs();

        let message = NewMessage {
            id: self.fresh_message_id(),
            sender_id: sender.id,
            recipient_id: recipient_id.unwrap_or(NO_RECIPIENT),
            ciphertext: ciphertext.clone(),
            key_material: Zeroizing::new(key.as_bytes().to_vec()),
            note: note.clone(),
            created_at_secs,
        };
        let id = self.persist(message, recipient_id.is_some())?;

        Ok(SentMessage {
            id,
            sender_email: sender.email.clone(),
            recipient_email,
            ciphertext,
            key,
            created_at_secs,
            note,
        })
    }

    /// Store `message`, drawing a new id on collision. Without `deliver` the
    /// same storage work is done and rolled back.
    fn persist(&self, mut message: NewMessage, deliver: bool) -> Result<MessageId, MessagingError> {
        let (sender_id, recipient_id) = (message.sender_id, message.recipient_id);

        let mut attempt = 1;
        loop {
            let result = if deliver {
                self.storage.store_message(&message).map(|stored| stored.id)
            } else {
                self.storage.rehearse_message(&message).map(|()| message.id)
            };

            match result {
                Ok(id) if deliver => {
                    tracing::info!(message_id = id, sender_id, recipient_id, "message stored");
                    return Ok(id);
                },
                Ok(id) => {
                    tracing::debug!(sender_id, "recipient not registered, nothing stored");
                    return Ok(id);
                },
                Err(StorageError::Conflict { .. }) if attempt < MAX_ID_ATTEMPTS => {
                    tracing::debug!(attempt, "message id collision, retrying");
                    attempt += 1;
                    message.id = self.fresh_message_id();
                },
                Err(err) => {
                    tracing::error!(sender_id, recipient_id, error = %err, "failed to store message");
                    return Err(err.into());
                },
            }
        }
    }

    /// Random non-zero id below 2^53.
    fn fresh_message_id(&self) -> MessageId {
        loop {
            let id = self.env.random_u64() & MESSAGE_ID_MASK;
            if id != 0 {
                return id;
            }
        }
    }

    /// Deliver every pending message for `reader`, consuming their keys.
    ///
    /// Returns oldest first. A second call returns only messages that arrived
    /// in between.
    pub async fn inbox(&self, reader: &AuthenticatedUser) -> Result<Vec<InboxItem>, MessagingError> {
        let claimed = self.storage.claim_inbox(reader.id, self.env.wall_clock_secs()).map_err(
            |err| {
                tracing::error!(recipient_id = reader.id, error = %err, "failed to claim inbox");
                err
            },
        )?;

        tracing::info!(recipient_id = reader.id, count = claimed.len(), "inbox claimed");

        let mut senders: HashMap<UserId, String> = HashMap::new();
        let mut items = Vec::with_capacity(claimed.len());
        for mut entry in claimed {
            let key = OneTimeKey::from_bytes(std::mem::take(&mut *entry.key_material));
            let message = entry.message;
            let sender_email = match senders.get(&message.sender_id) {
                Some(email) => email.clone(),
                None => {
                    let email = self.sender_email(message.sender_id).await;
                    senders.insert(message.sender_id, email.clone());
                    email
                },
            };

            items.push(InboxItem {
                id: message.id,
                sender_email,
                note: message.note,
                ciphertext: message.ciphertext,
                key,
                created_at_secs: message.created_at_secs,
            });
        }

        Ok(items)
    }

    async fn sender_email(&self, sender_id: UserId) -> String {
        match self.identity.resolve_user_profile(sender_id).await {
            Ok(Some(profile)) => profile.email,
            Ok(None) => {
                tracing::warn!(sender_id, "sender not found");
                UNKNOWN_SENDER.to_string()
            },
            Err(err) => {
                tracing::warn!(sender_id, error = %err, "sender lookup failed");
                UNKNOWN_SENDER.to_string()
            },
        }
    }
}
