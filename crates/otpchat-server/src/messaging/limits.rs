//! Input bounds for sends.

use super::MessagingError;

/// Size limits for a send, in characters (not bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    /// Maximum plaintext length.
    pub max_plaintext_chars: usize,
    /// Maximum note length.
    pub max_note_chars: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self { max_plaintext_chars: 5_000, max_note_chars: 255 }
    }
}

impl MessageLimits {
    pub(crate) fn check_plaintext(&self, plaintext: &str) -> Result<(), MessagingError> {
        if plaintext.is_empty() {
            return Err(MessagingError::validation("plaintext", "must not be empty"));
        }
        check_len("plaintext", plaintext, self.max_plaintext_chars)
    }

    pub(crate) fn check_note(&self, note: Option<&str>) -> Result<(), MessagingError> {
        note.map_or(Ok(()), |note| check_len("note", note, self.max_note_chars))
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), MessagingError> {
    if value.chars().count() > max {
        return Err(MessagingError::validation(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}
