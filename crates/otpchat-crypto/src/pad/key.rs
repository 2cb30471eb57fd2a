//! One-time key material and its generation.

use std::fmt;

use zeroize::Zeroize;

use super::{encoding::Encoding, error::PadError};

/// Random key material that masks exactly one message.
///
/// The length always equals the byte length of the plaintext it was generated
/// for. Bytes are zeroized on drop, and `Debug` never prints them.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimeKey {
    material: Vec<u8>,
}

impl OneTimeKey {
    /// Wrap existing key material (e.g. loaded back from storage).
    pub fn from_bytes(material: Vec<u8>) -> Self {
        Self { material }
    }

    /// Parse key material from its wire encoding.
    pub fn decode(encoding: Encoding, text: &str) -> Result<Self, PadError> {
        encoding.decode(text).map(Self::from_bytes)
    }

    /// Key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.material
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.material.len()
    }

    /// True for the zero-length key (only valid for an empty plaintext).
    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    /// Render the key for a client.
    pub fn encode(&self, encoding: Encoding) -> String {
        encoding.encode(&self.material)
    }
}

impl fmt::Debug for OneTimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneTimeKey").field("len", &self.material.len()).finish_non_exhaustive()
    }
}

impl Drop for OneTimeKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

/// Generate a key of exactly `length` bytes from a caller-supplied source.
///
/// `fill` must write cryptographically secure random bytes into the whole
/// buffer in production. Tests pass a seeded source to pin the key stream.
pub fn generate_key(length: usize, fill: impl FnOnce(&mut [u8])) -> OneTimeKey {
    let mut material = vec![0u8; length];
    fill(&mut material);

    debug_assert_eq!(material.len(), length);
    OneTimeKey { material }
}
