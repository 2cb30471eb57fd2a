//! Server error types.

use std::fmt;

use crate::{auth::AuthError, identity::IdentityError, storage::StorageError};

/// Errors that can occur starting or running the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, incomplete provider
    /// settings, etc.).
    ///
    /// Fatal: fix configuration and restart.
    Config(String),

    /// Network error (bind failure, accept loop failure).
    ///
    /// May be transient (interface not up yet) or fatal (address in use).
    Transport(String),

    /// Storage could not be opened.
    Storage(StorageError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<IdentityError> for ServerError {
    fn from(err: IdentityError) -> Self {
        Self::Config(err.to_string())
    }
}
