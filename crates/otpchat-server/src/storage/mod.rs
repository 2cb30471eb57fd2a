//! Storage abstraction for users, one-time keys and messages
//!
//! Trait-based abstraction with a synchronous API, like the rest of the
//! protocol logic. The two operations with protocol obligations are
//! [`Storage::store_message`] (key + message commit together) and
//! [`Storage::claim_inbox`] (select-unused + mark-used commit together).

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use self::redb::RedbStorage;

/// Local user identifier, allocated by storage.
pub type UserId = u64;

/// Message identifier, chosen by the messaging service.
pub type MessageId = u64;

/// A user record. Email is unique and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    /// Local identifier.
    pub id: UserId,
    /// Normalised email address.
    pub email: String,
    /// Inactive users cannot authenticate and cannot receive messages.
    pub is_active: bool,
    /// Unix timestamp (seconds) of provisioning.
    pub created_at_secs: u64,
}

/// Single-use key material persisted alongside exactly one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    /// Internal key identifier. Never leaves storage.
    pub id: u64,
    /// Raw key bytes. Wiped when the row is dropped.
    pub material: Zeroizing<Vec<u8>>,
    /// Set exactly once, never cleared.
    pub used: bool,
    /// Unix timestamp (seconds) of creation.
    pub created_at_secs: u64,
    /// Unix timestamp (seconds) of consumption. `Some` iff `used`.
    pub used_at_secs: Option<u64>,
}

/// A persisted message. Ciphertext length equals its key's length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Addressee.
    pub recipient_id: UserId,
    /// XOR of plaintext and key.
    pub ciphertext: Vec<u8>,
    /// The message's key (1:1).
    pub key_id: u64,
    /// Free-text note, stored in the clear.
    pub note: Option<String>,
    /// Unix timestamp (seconds) of the send.
    pub created_at_secs: u64,
}

/// Everything needed to persist a send.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Identifier chosen by the caller. Must be unused.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Addressee.
    pub recipient_id: UserId,
    /// XOR of plaintext and key.
    pub ciphertext: Vec<u8>,
    /// Key bytes, same length as `ciphertext`.
    pub key_material: Zeroizing<Vec<u8>>,
    /// Free-text note.
    pub note: Option<String>,
    /// Unix timestamp (seconds) of the send.
    pub created_at_secs: u64,
}

/// A message handed out by [`Storage::claim_inbox`], with its now-used key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedMessage {
    /// The message row.
    pub message: StoredMessage,
    /// Key bytes. This is the only time they leave storage.
    pub key_material: Zeroizing<Vec<u8>>,
}

impl NewMessage {
    /// Check the 1:1 length invariant before anything is written.
    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        if self.ciphertext.len() != self.key_material.len() {
            return Err(StorageError::Invariant(format!(
                "ciphertext is {} bytes but key is {} bytes",
                self.ciphertext.len(),
                self.key_material.len()
            )));
        }
        Ok(())
    }
}

/// Sort claimed messages oldest first, ties broken by id.
pub(crate) fn sort_claimed(claimed: &mut [ClaimedMessage]) {
    claimed.sort_by_key(|c| (c.message.created_at_secs, c.message.id));
}

/// Storage abstraction for users, keys and messages
///
/// Must be Clone (shared by every request handler), Send + Sync, and
/// synchronous. Implementations share internal state via Arc, so clones access
/// the same underlying storage.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned. Acceptable for test/simulation code; the redb backend does not
/// lock in-process.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Fetch the user with this email, creating an active one if absent.
    ///
    /// Idempotent: concurrent calls for the same email yield the same id.
    fn get_or_create_user(&self, email: &str, now_secs: u64) -> Result<StoredUser, StorageError>;

    /// Look up a user by (normalised) email.
    fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, StorageError>;

    /// Look up a user by id.
    fn load_user(&self, user_id: UserId) -> Result<Option<StoredUser>, StorageError>;

    /// Activate or deactivate a user.
    ///
    /// Returns `NotFound` if the user does not exist.
    fn set_user_active(&self, user_id: UserId, active: bool) -> Result<(), StorageError>;

    /// Persist a key (unused) and its message as one atomic unit.
    ///
    /// # Invariants
    ///
    /// - Pre: `ciphertext.len() == key_material.len()`, else `Invariant`
    /// - Pre: `message.id` unused, else `Conflict`
    /// - Post: on `Ok`, message, key and pending-inbox entry are all visible;
    ///   on `Err`, none of them are
    fn store_message(&self, message: &NewMessage) -> Result<StoredMessage, StorageError>;

    /// Do the work of [`Storage::store_message`] for `message`, then undo it.
    ///
    /// Sends to recipients that do not exist go through here so they cost
    /// the same as real ones. Fails exactly where `store_message` would.
    ///
    /// # Invariants
    ///
    /// - Post: on `Ok` or `Err`, nothing is visible and no identifier is
    ///   consumed
    fn rehearse_message(&self, message: &NewMessage) -> Result<(), StorageError>;

    /// Take every undelivered message for `recipient_id` and mark its key
    /// used, atomically.
    ///
    /// # Invariants
    ///
    /// - Concurrent claims for one recipient return disjoint sets
    /// - A returned message is never returned again
    /// - Post: each returned key has `used == true`, `used_at_secs == now_secs`
    ///
    /// Order: oldest first.
    fn claim_inbox(
        &self,
        recipient_id: UserId,
        now_secs: u64,
    ) -> Result<Vec<ClaimedMessage>, StorageError>;

    /// Load a message by id.
    fn load_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>, StorageError>;

    /// Load a key by its internal id.
    fn load_key(&self, key_id: u64) -> Result<Option<StoredKey>, StorageError>;

    /// Number of undelivered messages addressed to `recipient_id`.
    fn pending_count(&self, recipient_id: UserId) -> Result<usize, StorageError>;

    /// Total messages stored.
    fn message_count(&self) -> Result<usize, StorageError>;

    /// Total keys stored.
    fn key_count(&self) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use zeroize::ZeroizeOnDrop;

    use super::*;

    fn wiped_on_drop<T: ZeroizeOnDrop>(_: &T) {}

    #[test]
    fn key_copies_are_wiped_on_drop() {
        let message = NewMessage {
            id: 1,
            sender_id: 1,
            recipient_id: 2,
            ciphertext: vec![1, 2],
            key_material: vec![3, 4].into(),
            note: None,
            created_at_secs: 0,
        };
        let key = StoredKey {
            id: 1,
            material: message.key_material.clone(),
            used: false,
            created_at_secs: 0,
            used_at_secs: None,
        };
        let stored = StoredMessage {
            id: 1,
            sender_id: 1,
            recipient_id: 2,
            ciphertext: vec![1, 2],
            key_id: 1,
            note: None,
            created_at_secs: 0,
        };
        let claimed = ClaimedMessage { message: stored, key_material: key.material.clone() };

        wiped_on_drop(&message.key_material);
        wiped_on_drop(&key.material);
        wiped_on_drop(&claimed.key_material);
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let message = NewMessage {
            id: 1,
            sender_id: 1,
            recipient_id: 2,
            ciphertext: vec![1, 2, 3],
            key_material: vec![3, 4].into(),
            note: None,
            created_at_secs: 0,
        };
        assert!(matches!(message.validate(), Err(StorageError::Invariant(_))));
    }
}
