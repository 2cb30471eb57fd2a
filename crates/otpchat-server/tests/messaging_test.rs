//! Send and inbox behaviour of `MessagingService`.

mod common;

use std::sync::Arc;

use common::{SeededEnv, UnreachableDirectory, service, user};
use otpchat_crypto::decrypt;
use otpchat_server::{
    MessageLimits, MessagingError, MessagingService,
    identity::{IdentityError, LocalDirectory},
    messaging::{SendRequest, UNKNOWN_SENDER},
    storage::{ChaoticStorage, MemoryStorage, Storage, StorageError},
};

fn request(to: &str, plaintext: &str, note: Option<&str>) -> SendRequest {
    SendRequest {
        recipient_email: to.to_string(),
        plaintext: plaintext.to_string(),
        note: note.map(str::to_string),
    }
}

#[tokio::test]
async fn hello_world_round_trip() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");
    let messaging = service(storage.clone(), SeededEnv::new(1));

    let sent =
        messaging.send(&alice, request("bob@example.com", "Hello world", Some("Hi"))).await.unwrap();

    assert_eq!(sent.key.len(), 11);
    assert_eq!(sent.ciphertext.len(), 11);
    assert_eq!(decrypt(&sent.ciphertext, &sent.key).unwrap(), b"Hello world");
    assert_eq!(sent.sender_email, "alice@example.com");
    assert_eq!(sent.recipient_email, "bob@example.com");

    // Exactly one message and one unused key, linked 1:1
    assert_eq!(storage.message_count().unwrap(), 1);
    assert_eq!(storage.key_count().unwrap(), 1);
    let stored = storage.load_message(sent.id).unwrap().unwrap();
    let key = storage.load_key(stored.key_id).unwrap().unwrap();
    assert!(!key.used);
    assert_eq!(key.material.as_slice(), sent.key.as_bytes());

    let inbox = messaging.inbox(&bob).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, sent.id);
    assert_eq!(inbox[0].sender_email, "alice@example.com");
    assert_eq!(inbox[0].note.as_deref(), Some("Hi"));
    assert_eq!(decrypt(&inbox[0].ciphertext, &inbox[0].key).unwrap(), b"Hello world");

    assert!(messaging.inbox(&bob).await.unwrap().is_empty());
    assert!(storage.load_key(stored.key_id).unwrap().unwrap().used);
}

#[tokio::test]
async fn recipient_email_is_normalised() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");
    let messaging = service(storage, SeededEnv::new(2));

    let sent = messaging.send(&alice, request("  Bob@Example.COM ", "x", None)).await.unwrap();
    assert_eq!(sent.recipient_email, "bob@example.com");
    assert_eq!(messaging.inbox(&bob).await.unwrap().len(), 1);
}

#[tokio::test]
async fn multibyte_plaintext_keys_match_byte_length() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    user(&storage, "bob@example.com");
    let messaging = service(storage, SeededEnv::new(3));

    let sent = messaging.send(&alice, request("bob@example.com", "héllo €", None)).await.unwrap();
    assert_eq!(sent.key.len(), "héllo €".len());
    assert_eq!(decrypt(&sent.ciphertext, &sent.key).unwrap(), "héllo €".as_bytes());
}

#[tokio::test]
async fn empty_plaintext_rejected_without_persisting() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    user(&storage, "bob@example.com");
    let messaging = service(storage.clone(), SeededEnv::new(4));

    let err = messaging.send(&alice, request("bob@example.com", "", None)).await.unwrap_err();
    assert!(matches!(err, MessagingError::Validation { field: "plaintext", .. }));
    assert_eq!(storage.message_count().unwrap(), 0);
    assert_eq!(storage.key_count().unwrap(), 0);
}

#[tokio::test]
async fn oversized_note_names_note() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    user(&storage, "bob@example.com");
    let messaging = service(storage.clone(), SeededEnv::new(5));

    let note = "n".repeat(256);
    let err =
        messaging.send(&alice, request("bob@example.com", "hi", Some(&note))).await.unwrap_err();
    assert!(matches!(err, MessagingError::Validation { field: "note", .. }));
    assert_eq!(storage.message_count().unwrap(), 0);
}

#[tokio::test]
async fn oversized_plaintext_rejected() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    user(&storage, "bob@example.com");
    let identity = Arc::new(LocalDirectory::new(storage.clone()));
    let limits = MessageLimits { max_plaintext_chars: 4, ..MessageLimits::default() };
    let messaging = MessagingService::new(storage, SeededEnv::new(6), identity, limits);

    assert!(messaging.send(&alice, request("bob@example.com", "four", None)).await.is_ok());
    let err = messaging.send(&alice, request("bob@example.com", "fives", None)).await.unwrap_err();
    assert!(matches!(err, MessagingError::Validation { field: "plaintext", .. }));
}

#[tokio::test]
async fn malformed_recipient_rejected() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let messaging = service(storage, SeededEnv::new(7));

    for bad in ["", "bob", "bob@", "bob@localhost"] {
        let err = messaging.send(&alice, request(bad, "hi", None)).await.unwrap_err();
        assert!(
            matches!(err, MessagingError::Validation { field: "recipient_email", .. }),
            "{bad:?} accepted"
        );
    }
}

#[tokio::test]
async fn unknown_recipient_looks_like_success_and_stores_nothing() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    user(&storage, "bob@example.com");
    let messaging = service(storage.clone(), SeededEnv::new(8));

    let known = messaging.send(&alice, request("bob@example.com", "same text", None)).await.unwrap();
    let unknown =
        messaging.send(&alice, request("nobody@example.com", "same text", None)).await.unwrap();

    assert_ne!(unknown.id, 0);
    assert!(unknown.id < 1 << 53);
    assert_eq!(unknown.key.len(), known.key.len());
    assert_eq!(unknown.ciphertext.len(), known.ciphertext.len());
    assert_eq!(decrypt(&unknown.ciphertext, &unknown.key).unwrap(), b"same text");
    assert_eq!(unknown.recipient_email, "nobody@example.com");

    assert_eq!(storage.message_count().unwrap(), 1);
    assert_eq!(storage.key_count().unwrap(), 1);
    assert!(storage.load_message(unknown.id).unwrap().is_none());
}

#[tokio::test]
async fn unknown_recipient_does_the_same_storage_work() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");

    // Lookups see the real store; every write fails
    let broken = ChaoticStorage::new(storage.clone(), 1.0);
    let messaging = MessagingService::new(
        broken.clone(),
        SeededEnv::new(10),
        Arc::new(LocalDirectory::new(storage.clone())),
        MessageLimits::default(),
    );

    let known = messaging.send(&alice, request("bob@example.com", "x", None)).await.unwrap_err();
    let unknown =
        messaging.send(&alice, request("nobody@example.com", "x", None)).await.unwrap_err();
    assert!(matches!(known, MessagingError::Storage(StorageError::Io(_))));
    assert!(matches!(unknown, MessagingError::Storage(StorageError::Io(_))));
    assert_eq!(broken.injected_failures(), 2);

    // A successful rehearsal consumes no key id
    let messaging = service(storage.clone(), SeededEnv::new(11));
    messaging.send(&alice, request("nobody@example.com", "x", None)).await.unwrap();
    let sent = messaging.send(&alice, request("bob@example.com", "x", None)).await.unwrap();
    assert_eq!(storage.load_message(sent.id).unwrap().unwrap().key_id, 1);
    assert_eq!(storage.pending_count(bob.id).unwrap(), 1);
}

#[tokio::test]
async fn inactive_recipient_treated_as_unknown() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");
    storage.set_user_active(bob.id, false).unwrap();
    let messaging = service(storage.clone(), SeededEnv::new(9));

    messaging.send(&alice, request("bob@example.com", "hi", None)).await.unwrap();
    assert_eq!(storage.message_count().unwrap(), 0);
    assert_eq!(storage.pending_count(bob.id).unwrap(), 0);
}

#[tokio::test]
async fn distinct_sends_use_distinct_keys() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    user(&storage, "bob@example.com");
    let messaging = service(storage, SeededEnv::new(10));

    let first = messaging.send(&alice, request("bob@example.com", "repeat me", None)).await.unwrap();
    let second =
        messaging.send(&alice, request("bob@example.com", "repeat me", None)).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(first.key, second.key);
    assert_ne!(first.ciphertext, second.ciphertext);
}

#[tokio::test]
async fn inbox_is_oldest_first_and_per_recipient() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");
    let carol = user(&storage, "carol@example.com");
    let env = SeededEnv::new(11);
    let messaging = service(storage, env.clone());

    for text in ["one", "two", "three"] {
        messaging.send(&alice, request("bob@example.com", text, None)).await.unwrap();
        env.advance(5);
    }
    messaging.send(&alice, request("carol@example.com", "for carol", None)).await.unwrap();

    let inbox = messaging.inbox(&bob).await.unwrap();
    let texts: Vec<Vec<u8>> =
        inbox.iter().map(|item| decrypt(&item.ciphertext, &item.key).unwrap()).collect();
    assert_eq!(texts, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

    assert_eq!(messaging.inbox(&carol).await.unwrap().len(), 1);
    assert!(messaging.inbox(&alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn messages_sent_after_a_read_arrive_on_the_next_read() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");
    let messaging = service(storage, SeededEnv::new(12));

    messaging.send(&alice, request("bob@example.com", "first", None)).await.unwrap();
    assert_eq!(messaging.inbox(&bob).await.unwrap().len(), 1);

    let later = messaging.send(&alice, request("bob@example.com", "second", None)).await.unwrap();
    let inbox = messaging.inbox(&bob).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, later.id);
}

#[tokio::test]
async fn upstream_failure_on_send_is_an_error() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let messaging = MessagingService::new(
        storage.clone(),
        SeededEnv::new(13),
        Arc::new(UnreachableDirectory),
        MessageLimits::default(),
    );

    let err = messaging.send(&alice, request("bob@example.com", "hi", None)).await.unwrap_err();
    assert!(matches!(err, MessagingError::Identity(IdentityError::Upstream(_))));
    assert!(err.is_transient());
    assert_eq!(storage.message_count().unwrap(), 0);
}

#[tokio::test]
async fn unresolvable_sender_renders_unknown_and_keys_are_still_delivered() {
    let storage = MemoryStorage::new();
    let alice = user(&storage, "alice@example.com");
    let bob = user(&storage, "bob@example.com");
    service(storage.clone(), SeededEnv::new(14))
        .send(&alice, request("bob@example.com", "hi", None))
        .await
        .unwrap();

    let reader = MessagingService::new(
        storage.clone(),
        SeededEnv::new(15),
        Arc::new(UnreachableDirectory),
        MessageLimits::default(),
    );
    let inbox = reader.inbox(&bob).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender_email, UNKNOWN_SENDER);
    assert_eq!(decrypt(&inbox[0].ciphertext, &inbox[0].key).unwrap(), b"hi");
    assert_eq!(storage.pending_count(bob.id).unwrap(), 0);
}
