//! XOR cipher over equal-length byte strings.
//!
//! All functions are pure. `decrypt` is `encrypt`: XOR is its own inverse.

use super::{encoding::Encoding, error::PadError, key::OneTimeKey};

/// Mask `plaintext` with `key`.
///
/// # Errors
///
/// - `LengthMismatch`: key length differs from plaintext length. No bytes are
///   processed
pub fn encrypt(plaintext: &[u8], key: &OneTimeKey) -> Result<Vec<u8>, PadError> {
    xor(plaintext, key.as_bytes())
}

/// Unmask `ciphertext` with `key`.
///
/// # Errors
///
/// - `LengthMismatch`: key length differs from ciphertext length
pub fn decrypt(ciphertext: &[u8], key: &OneTimeKey) -> Result<Vec<u8>, PadError> {
    xor(ciphertext, key.as_bytes())
}

/// Decode a ciphertext and key as a client received them, then decrypt.
///
/// # Errors
///
/// - `InvalidEncoding`: either input is not valid `encoding`
/// - `LengthMismatch`: the decoded lengths differ
pub fn open(encoding: Encoding, ciphertext: &str, key: &str) -> Result<Vec<u8>, PadError> {
    let ciphertext = encoding.decode(ciphertext)?;
    let key = OneTimeKey::decode(encoding, key)?;
    decrypt(&ciphertext, &key)
}

fn xor(data: &[u8], key: &[u8]) -> Result<Vec<u8>, PadError> {
    if data.len() != key.len() {
        return Err(PadError::LengthMismatch { data: data.len(), key: key.len() });
    }

    let out: Vec<u8> = data.iter().zip(key).map(|(d, k)| d ^ k).collect();

    debug_assert_eq!(out.len(), data.len());
    Ok(out)
}
