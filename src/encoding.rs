//! Legacy (single-byte) text encodings for Pascal strings
//!
//! Photoshop stores layer and resource names as Pascal strings in the
//! system code page. Decoding is best-effort and never fails.

use serde::{Deserialize, Serialize};

/// Encoding used for legacy (non-Unicode) strings in the file
pub trait TextEncoding: Send + Sync {
    /// Decode bytes into text, replacing anything unmappable
    fn decode(&self, bytes: &[u8]) -> String;

    /// Encode text into bytes, replacing anything unmappable
    fn encode(&self, text: &str) -> Vec<u8>;
}

/// Built-in legacy encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyEncoding {
    /// ISO-8859-1: every byte maps to the code point of the same value
    #[default]
    Latin1,
    /// 7-bit ASCII, anything else becomes `?`
    Ascii,
    /// UTF-8, decoded lossily
    Utf8,
}

impl TextEncoding for LegacyEncoding {
    fn decode(&self, bytes: &[u8]) -> String {
        match self {
            LegacyEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            LegacyEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
            LegacyEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            LegacyEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            LegacyEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            LegacyEncoding::Utf8 => text.as_bytes().to_vec(),
        }
    }
}
