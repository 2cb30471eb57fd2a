//! otpchat cryptographic primitives
//!
//! One-time pad building blocks. Pure functions with deterministic outputs:
//! callers provide the random bytes, so tests can pin the key stream while
//! production draws from the OS.
//!
//! # Key Lifecycle
//!
//! ```text
//! Random bytes (caller)
//!        │
//!        ▼
//! OneTimeKey (len == plaintext bytes)
//!        │
//!        ▼
//! XOR → Ciphertext
//! ```
//!
//! A key masks exactly one message. Reuse is prevented one level up (the
//! server stores each key against a single message and hands it out at most
//! once); nothing in this crate can detect it.
//!
//! # Security
//!
//! - Key length equals plaintext length. Mismatches are rejected before any
//!   byte is touched; there is no truncation or padding
//! - Key material is zeroized on drop
//! - The transform is an involution: `decrypt` and `encrypt` are the same XOR

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod pad;

pub use pad::{Encoding, OneTimeKey, PadError, decrypt, encrypt, generate_key, open};
