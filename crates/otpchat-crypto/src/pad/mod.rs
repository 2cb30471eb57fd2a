//! One-time pad: key generation and the XOR cipher.

mod cipher;
mod encoding;
mod error;
mod key;

pub use cipher::{decrypt, encrypt, open};
pub use encoding::Encoding;
pub use error::PadError;
pub use key::{OneTimeKey, generate_key};
