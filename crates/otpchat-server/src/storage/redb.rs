//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Redb
//! admits one write transaction at a time, which serialises `store_message`
//! and `claim_inbox` against each other. All state survives server restarts.

use std::{fmt::Display, path::Path, sync::Arc};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{Serialize, de::DeserializeOwned};

use super::{
    ClaimedMessage, MessageId, NewMessage, Storage, StorageError, StoredKey, StoredMessage,
    StoredUser, UserId, sort_claimed,
};

/// Table: users
/// Key: user_id
/// Value: CBOR-encoded StoredUser
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Table: user_emails
/// Key: normalised email
/// Value: user_id
const USER_EMAILS: TableDefinition<&str, u64> = TableDefinition::new("user_emails");

/// Table: keys
/// Key: key_id
/// Value: CBOR-encoded StoredKey
const KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("keys");

/// Table: messages
/// Key: message_id
/// Value: CBOR-encoded StoredMessage
const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("messages");

/// Table: pending
/// Key: (recipient_id: u64, message_id: u64) as big-endian bytes [16 bytes]
/// Value: key_id
///
/// One row per undelivered message. Removed in the same transaction that
/// marks the key used.
const PENDING: TableDefinition<&[u8], u64> = TableDefinition::new("pending");

/// Table: counters
/// Key: counter name
/// Value: next identifier to allocate
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_USER_ID: &str = "next_user_id";
const NEXT_KEY_ID: &str = "next_key_id";

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(USERS).map_err(io)?;
            let _ = txn.open_table(USER_EMAILS).map_err(io)?;
            let _ = txn.open_table(KEYS).map_err(io)?;
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(PENDING).map_err(io)?;
            let _ = txn.open_table(COUNTERS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn get_or_create_user(&self, email: &str, now_secs: u64) -> Result<StoredUser, StorageError> {
        // Every authenticated request lands here; only provisioning needs
        // the writer.
        if let Some(user) = self.find_user_by_email(email)? {
            return Ok(user);
        }

        let txn = self.db.begin_write().map_err(io)?;

        let user = {
            let mut emails = txn.open_table(USER_EMAILS).map_err(io)?;
            let mut users = txn.open_table(USERS).map_err(io)?;

            let existing = emails.get(email).map_err(io)?.map(|id| id.value());
            if let Some(id) = existing {
                let bytes = users.get(id).map_err(io)?.map(|v| v.value().to_vec()).ok_or_else(
                    || StorageError::Invariant(format!("email index points at {id}")),
                )?;
                return decode(&bytes);
            }

            let mut counters = txn.open_table(COUNTERS).map_err(io)?;
            let id = next_id(&mut counters, NEXT_USER_ID)?;

            let user = StoredUser {
                id,
                email: email.to_string(),
                is_active: true,
                created_at_secs: now_secs,
            };
            users.insert(id, encode(&user)?.as_slice()).map_err(io)?;
            emails.insert(email, id).map_err(io)?;
            user
        };

        txn.commit().map_err(io)?;
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let emails = txn.open_table(USER_EMAILS).map_err(io)?;

        let Some(id) = emails.get(email).map_err(io)?.map(|id| id.value()) else {
            return Ok(None);
        };

        let users = txn.open_table(USERS).map_err(io)?;
        match users.get(id).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<StoredUser>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let users = txn.open_table(USERS).map_err(io)?;

        match users.get(user_id).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn set_user_active(&self, user_id: UserId, active: bool) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut users = txn.open_table(USERS).map_err(io)?;

            let bytes = users
                .get(user_id)
                .map_err(io)?
                .map(|v| v.value().to_vec())
                .ok_or(StorageError::NotFound { entity: "user", id: user_id })?;

            let mut user: StoredUser = decode(&bytes)?;
            user.is_active = active;
            users.insert(user_id, encode(&user)?.as_slice()).map_err(io)?;
        }

        txn.commit().map_err(io)?;
        Ok(())
    }

    fn store_message(&self, message: &NewMessage) -> Result<StoredMessage, StorageError> {
        message.validate()?;

        // Dropping the transaction on any early return aborts it, so the key,
        // message and pending row land together or not at all.
        let txn = self.db.begin_write().map_err(io)?;
        let stored = stage_message(&txn, message)?;
        txn.commit().map_err(io)?;
        Ok(stored)
    }

    fn rehearse_message(&self, message: &NewMessage) -> Result<(), StorageError> {
        message.validate()?;

        // Committed rather than aborted so the cost matches a real send
        let txn = self.db.begin_write().map_err(io)?;
        let staged = stage_message(&txn, message)?;
        unstage_message(&txn, &staged)?;
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn claim_inbox(
        &self,
        recipient_id: UserId,
        now_secs: u64,
    ) -> Result<Vec<ClaimedMessage>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let mut claimed = {
            let mut pending = txn.open_table(PENDING).map_err(io)?;
            let messages = txn.open_table(MESSAGES).map_err(io)?;
            let mut keys = txn.open_table(KEYS).map_err(io)?;

            let start_key = encode_pending_key(recipient_id, 0);
            let end_key = encode_pending_key(recipient_id, u64::MAX);

            let mut entries: Vec<(MessageId, u64)> = Vec::new();
            for result in pending.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)? {
                let (key, value) = result.map_err(io)?;
                let (_, message_id) = decode_pending_key(key.value())?;
                entries.push((message_id, value.value()));
            }

            let mut claimed = Vec::with_capacity(entries.len());
            for (message_id, key_id) in entries {
                let pending_key = encode_pending_key(recipient_id, message_id);
                pending.remove(pending_key.as_slice()).map_err(io)?;

                let message: StoredMessage = match messages.get(message_id).map_err(io)? {
                    Some(value) => decode(value.value())?,
                    None => return Err(StorageError::NotFound { entity: "message", id: message_id }),
                };

                let mut key: StoredKey = match keys.get(key_id).map_err(io)? {
                    Some(value) => decode(value.value())?,
                    None => return Err(StorageError::NotFound { entity: "key", id: key_id }),
                };

                if key.used {
                    continue;
                }
                key.used = true;
                key.used_at_secs = Some(now_secs);
                keys.insert(key_id, encode(&key)?.as_slice()).map_err(io)?;

                debug_assert_eq!(key.material.len(), message.ciphertext.len());
                claimed.push(ClaimedMessage { key_material: key.material.clone(), message });
            }
            claimed
        };

        txn.commit().map_err(io)?;

        sort_claimed(&mut claimed);
        Ok(claimed)
    }

    fn load_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let messages = txn.open_table(MESSAGES).map_err(io)?;

        match messages.get(message_id).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn load_key(&self, key_id: u64) -> Result<Option<StoredKey>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let keys = txn.open_table(KEYS).map_err(io)?;

        match keys.get(key_id).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn pending_count(&self, recipient_id: UserId) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let pending = txn.open_table(PENDING).map_err(io)?;

        let start_key = encode_pending_key(recipient_id, 0);
        let end_key = encode_pending_key(recipient_id, u64::MAX);

        let mut count = 0;
        for result in pending.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)? {
            result.map_err(io)?;
            count += 1;
        }
        Ok(count)
    }

    fn message_count(&self) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let messages = txn.open_table(MESSAGES).map_err(io)?;
        Ok(messages.len().map_err(io)? as usize)
    }

    fn key_count(&self) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let keys = txn.open_table(KEYS).map_err(io)?;
        Ok(keys.len().map_err(io)? as usize)
    }
}

/// Write the key, message and pending rows for `message` into `txn`.
///
/// Returns `Conflict` if the message id is taken and `Invariant` if a key or
/// pending row is already there. The caller commits or drops `txn`.
fn stage_message(
    txn: &WriteTransaction,
    message: &NewMessage,
) -> Result<StoredMessage, StorageError> {
    let mut messages = txn.open_table(MESSAGES).map_err(io)?;
    if messages.get(message.id).map_err(io)?.is_some() {
        return Err(StorageError::Conflict { entity: "message", id: message.id });
    }

    let mut counters = txn.open_table(COUNTERS).map_err(io)?;
    let key_id = next_id(&mut counters, NEXT_KEY_ID)?;

    let key = StoredKey {
        id: key_id,
        material: message.key_material.clone(),
        used: false,
        created_at_secs: message.created_at_secs,
        used_at_secs: None,
    };
    let stored = StoredMessage {
        id: message.id,
        sender_id: message.sender_id,
        recipient_id: message.recipient_id,
        ciphertext: message.ciphertext.clone(),
        key_id,
        note: message.note.clone(),
        created_at_secs: message.created_at_secs,
    };

    let mut keys = txn.open_table(KEYS).map_err(io)?;
    if keys.insert(key_id, encode(&key)?.as_slice()).map_err(io)?.is_some() {
        return Err(StorageError::Invariant(format!("key {key_id} already exists")));
    }

    messages.insert(message.id, encode(&stored)?.as_slice()).map_err(io)?;

    let mut pending = txn.open_table(PENDING).map_err(io)?;
    let pending_key = encode_pending_key(message.recipient_id, message.id);
    if pending.insert(pending_key.as_slice(), key_id).map_err(io)?.is_some() {
        return Err(StorageError::Invariant(format!("message {} already pending", message.id)));
    }

    Ok(stored)
}

/// Remove rows written by [`stage_message`] and give back the key id.
fn unstage_message(txn: &WriteTransaction, stored: &StoredMessage) -> Result<(), StorageError> {
    txn.open_table(KEYS).map_err(io)?.remove(stored.key_id).map_err(io)?;
    txn.open_table(MESSAGES).map_err(io)?.remove(stored.id).map_err(io)?;

    let pending_key = encode_pending_key(stored.recipient_id, stored.id);
    txn.open_table(PENDING).map_err(io)?.remove(pending_key.as_slice()).map_err(io)?;

    txn.open_table(COUNTERS).map_err(io)?.insert(NEXT_KEY_ID, stored.key_id).map_err(io)?;
    Ok(())
}

fn io(err: impl Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Read and bump a counter. Identifiers start at 1.
fn next_id(
    counters: &mut redb::Table<'_, &'static str, u64>,
    name: &'static str,
) -> Result<u64, StorageError> {
    let current = counters.get(name).map_err(io)?.map_or(1, |v| v.value());
    counters.insert(name, current + 1).map_err(io)?;
    Ok(current)
}

/// Encode (recipient_id, message_id) as 16-byte big-endian key.
///
/// Layout: [recipient_id: 8 bytes BE][message_id: 8 bytes BE]
/// Big-endian keeps each recipient's rows contiguous for range scans.
fn encode_pending_key(recipient_id: UserId, message_id: MessageId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&recipient_id.to_be_bytes());
    key[8..].copy_from_slice(&message_id.to_be_bytes());
    key
}

/// Decode pending key back to (recipient_id, message_id).
fn decode_pending_key(key: &[u8]) -> Result<(UserId, MessageId), StorageError> {
    let bytes: [u8; 16] = key
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("pending key is {} bytes", key.len())))?;

    let mut recipient = [0u8; 8];
    let mut message = [0u8; 8];
    recipient.copy_from_slice(&bytes[..8]);
    message.copy_from_slice(&bytes[8..]);
    Ok((u64::from_be_bytes(recipient), u64::from_be_bytes(message)))
}
