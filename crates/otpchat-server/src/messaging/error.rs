//! Messaging errors.

use otpchat_crypto::PadError;
use thiserror::Error;

use crate::{identity::IdentityError, storage::StorageError};

/// Errors from sending or reading messages.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Caller input rejected. Nothing was generated or stored.
    #[error("{field} {reason}")]
    Validation {
        /// Offending request field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Recipient lookup failed (not the same as "no such recipient").
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Persisting or claiming failed; the transaction was rolled back.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Key generation or encryption failed.
    #[error("cipher error: {0}")]
    Crypto(#[from] PadError),
}

impl MessagingError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation { field, reason: reason.into() }
    }

    /// Returns true if the same request may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::Crypto(_) => false,
            Self::Identity(err) => err.is_transient(),
            Self::Storage(err) => err.is_transient(),
        }
    }
}
