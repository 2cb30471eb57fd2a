//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling.
//! Failures are injected at the call boundary, so the inner store never sees
//! a failed call. Rollback inside a transaction is tested per backend.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::sync::{Arc, Mutex};

use super::{
    ClaimedMessage, MessageId, NewMessage, Storage, StorageError, StoredKey, StoredMessage,
    StoredUser, UserId,
};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations,
/// before delegating, at a configured rate. Failed operations therefore never
/// reach the inner store. Uses `Arc<Mutex<>>` for the RNG state, making it
/// Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Number of injected failures so far
    failures: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator: fast and reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            failures: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> usize {
        *self.failures.lock().expect("failures mutex poisoned")
    }

    fn maybe_fail(&self, operation: &'static str) -> Result<(), StorageError> {
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").next() < self.failure_rate;
        if fail {
            *self.failures.lock().expect("failures mutex poisoned") += 1;
            return Err(StorageError::Io(format!("chaotic failure injection: {operation}")));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn get_or_create_user(&self, email: &str, now_secs: u64) -> Result<StoredUser, StorageError> {
        self.maybe_fail("get_or_create_user")?;
        self.inner.get_or_create_user(email, now_secs)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, StorageError> {
        self.maybe_fail("find_user_by_email")?;
        self.inner.find_user_by_email(email)
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<StoredUser>, StorageError> {
        self.maybe_fail("load_user")?;
        self.inner.load_user(user_id)
    }

    fn set_user_active(&self, user_id: UserId, active: bool) -> Result<(), StorageError> {
        self.maybe_fail("set_user_active")?;
        self.inner.set_user_active(user_id, active)
    }

    fn store_message(&self, message: &NewMessage) -> Result<StoredMessage, StorageError> {
        self.maybe_fail("store_message")?;
        self.inner.store_message(message)
    }

    fn rehearse_message(&self, message: &NewMessage) -> Result<(), StorageError> {
        self.maybe_fail("rehearse_message")?;
        self.inner.rehearse_message(message)
    }

    fn claim_inbox(
        &self,
        recipient_id: UserId,
        now_secs: u64,
    ) -> Result<Vec<ClaimedMessage>, StorageError> {
        self.maybe_fail("claim_inbox")?;
        self.inner.claim_inbox(recipient_id, now_secs)
    }

    fn load_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>, StorageError> {
        self.maybe_fail("load_message")?;
        self.inner.load_message(message_id)
    }

    fn load_key(&self, key_id: u64) -> Result<Option<StoredKey>, StorageError> {
        self.maybe_fail("load_key")?;
        self.inner.load_key(key_id)
    }

    // Counters never fail: chaos tests use them as oracles.

    fn pending_count(&self, recipient_id: UserId) -> Result<usize, StorageError> {
        self.inner.pending_count(recipient_id)
    }

    fn message_count(&self) -> Result<usize, StorageError> {
        self.inner.message_count()
    }

    fn key_count(&self) -> Result<usize, StorageError> {
        self.inner.key_count()
    }
}
