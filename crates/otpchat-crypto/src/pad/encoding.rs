//! Text encodings for key material and ciphertext on the wire.

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::PadError;

/// How bytes are rendered for clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Lowercase hex, two characters per byte
    #[default]
    Hex,
    /// Standard base64 with padding
    Base64,
}

impl Encoding {
    /// Render bytes as text.
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            Self::Hex => hex::encode(bytes),
            Self::Base64 => STANDARD.encode(bytes),
        }
    }

    /// Parse text back to bytes.
    ///
    /// Hex input may carry a `0x` prefix and embedded whitespace, which some
    /// clients insert when displaying long keys.
    pub fn decode(self, text: &str) -> Result<Vec<u8>, PadError> {
        match self {
            Self::Hex => {
                let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let digits = cleaned
                    .strip_prefix("0x")
                    .or_else(|| cleaned.strip_prefix("0X"))
                    .unwrap_or(&cleaned);
                hex::decode(digits).map_err(|e| PadError::InvalidEncoding {
                    encoding: self.name(),
                    reason: e.to_string(),
                })
            },
            Self::Base64 => STANDARD.decode(text.trim()).map_err(|e| PadError::InvalidEncoding {
                encoding: self.name(),
                reason: e.to_string(),
            }),
        }
    }

    /// Short lowercase name, as used in configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::Base64 => "base64",
        }
    }
}
