//! Error types for one-time pad operations

use thiserror::Error;

/// Errors from the cipher and from decoding keys or ciphertext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PadError {
    /// Key and data lengths differ.
    ///
    /// Rejected before any byte is processed. Silently truncating or padding
    /// would reuse or leak key positions.
    #[error("length mismatch: data is {data} bytes, key is {key} bytes")]
    LengthMismatch {
        /// Length of the plaintext or ciphertext
        data: usize,
        /// Length of the key
        key: usize,
    },

    /// Encoded key or ciphertext could not be decoded.
    #[error("invalid {encoding} encoding: {reason}")]
    InvalidEncoding {
        /// Encoding that was expected
        encoding: &'static str,
        /// Decoder error
        reason: String,
    },
}
