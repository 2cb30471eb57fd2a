#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use super::{
    ClaimedMessage, MessageId, NewMessage, Storage, StorageError, StoredKey, StoredMessage,
    StoredUser, UserId, sort_claimed,
};

/// In-memory storage implementation for development, testing and simulation
///
/// All state sits behind a single `Arc<Mutex<_>>`, so every trait method is
/// one critical section. That is what makes `store_message` and
/// `claim_inbox` atomic here. Panics if the mutex is poisoned.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

struct MemoryStorageInner {
    users: HashMap<UserId, StoredUser>,

    /// Email -> user id. Enforces email uniqueness.
    users_by_email: HashMap<String, UserId>,

    keys: HashMap<u64, StoredKey>,

    messages: HashMap<MessageId, StoredMessage>,

    /// Recipient -> ids of messages whose key is still unused
    pending: HashMap<UserId, BTreeSet<MessageId>>,

    next_user_id: UserId,
    next_key_id: u64,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageInner {
                users: HashMap::new(),
                users_by_email: HashMap::new(),
                keys: HashMap::new(),
                messages: HashMap::new(),
                pending: HashMap::new(),
                next_user_id: 1,
                next_key_id: 1,
            })),
        }
    }

    /// Number of users. Useful for debugging and testing.
    pub fn user_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").users.len()
    }
}

impl MemoryStorageInner {
    /// Insert the key, message and pending entry for `message` under the
    /// next key id, without advancing the counter.
    ///
    /// All checks happen before the first insert, so an error leaves
    /// nothing behind.
    fn stage(&mut self, message: &NewMessage) -> Result<StoredMessage, StorageError> {
        message.validate()?;

        if self.messages.contains_key(&message.id) {
            return Err(StorageError::Conflict { entity: "message", id: message.id });
        }

        let key_id = self.next_key_id;
        if self.keys.contains_key(&key_id) {
            return Err(StorageError::Invariant(format!("key {key_id} already exists")));
        }
        if self.pending.get(&message.recipient_id).is_some_and(|ids| ids.contains(&message.id)) {
            return Err(StorageError::Invariant(format!("message {} already pending", message.id)));
        }

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

        self.keys.insert(key_id, key);
        self.messages.insert(message.id, stored.clone());
        self.pending.entry(message.recipient_id).or_default().insert(message.id);

        Ok(stored)
    }

    fn unstage(&mut self, stored: &StoredMessage) {
        self.keys.remove(&stored.key_id);
        self.messages.remove(&stored.id);
        if let Some(ids) = self.pending.get_mut(&stored.recipient_id) {
            ids.remove(&stored.id);
            if ids.is_empty() {
                self.pending.remove(&stored.recipient_id);
            }
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get_or_create_user(&self, email: &str, now_secs: u64) -> Result<StoredUser, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if let Some(id) = inner.users_by_email.get(email).copied() {
            return inner
                .users
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::Invariant(format!("email index points at {id}")));
        }

        let id = inner.next_user_id;
        inner.next_user_id += 1;

        let user =
            StoredUser { id, email: email.to_string(), is_active: true, created_at_secs: now_secs };
        inner.users.insert(id, user.clone());
        inner.users_by_email.insert(email.to_string(), id);

        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.users_by_email.get(email).and_then(|id| inner.users.get(id)).cloned())
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<StoredUser>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").users.get(&user_id).cloned())
    }

    fn set_user_active(&self, user_id: UserId, active: bool) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::NotFound { entity: "user", id: user_id })?;
        user.is_active = active;
        Ok(())
    }

    fn store_message(&self, message: &NewMessage) -> Result<StoredMessage, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let stored = inner.stage(message)?;
        inner.next_key_id += 1;
        Ok(stored)
    }

    fn rehearse_message(&self, message: &NewMessage) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let staged = inner.stage(message)?;
        inner.unstage(&staged);
        Ok(())
    }

    fn claim_inbox(
        &self,
        recipient_id: UserId,
        now_secs: u64,
    ) -> Result<Vec<ClaimedMessage>, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let Some(pending) = inner.pending.get(&recipient_id) else {
            return Ok(Vec::new());
        };

        // Resolve everything first so a dangling reference leaves state intact
        let mut claimed = Vec::with_capacity(pending.len());
        for message_id in pending {
            let message = inner
                .messages
                .get(message_id)
                .cloned()
                .ok_or(StorageError::NotFound { entity: "message", id: *message_id })?;

            let key = inner
                .keys
                .get(&message.key_id)
                .ok_or(StorageError::NotFound { entity: "key", id: message.key_id })?;

            if key.used {
                continue;
            }

            debug_assert_eq!(key.material.len(), message.ciphertext.len());
            claimed.push(ClaimedMessage { key_material: key.material.clone(), message });
        }

        inner.pending.remove(&recipient_id);
        for item in &claimed {
            if let Some(key) = inner.keys.get_mut(&item.message.key_id) {
                key.used = true;
                key.used_at_secs = Some(now_secs);
            }
        }

        sort_claimed(&mut claimed);
        Ok(claimed)
    }

    fn load_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").messages.get(&message_id).cloned())
    }

    fn load_key(&self, key_id: u64) -> Result<Option<StoredKey>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").keys.get(&key_id).cloned())
    }

    fn pending_count(&self, recipient_id: UserId) -> Result<usize, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.pending.get(&recipient_id).map_or(0, BTreeSet::len))
    }

    fn message_count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").messages.len())
    }

    fn key_count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").keys.len())
    }
}
