//! Core types for Bulwark
//!
//! Questo modulo definisce i tipi fondamentali condivisi dai moduli:
//! - Timestamps
//! - Hashes
//! - Identificatori brevi
//! - Troncamento dell'output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// Blake3 hash wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash([u8; 32]);

impl Blake3Hash {
    /// Hash of `data`
    pub fn of(data: &[u8]) -> Self {
        blake3::hash(data).into()
    }

    /// 64 lowercase hex chars; backup sidecars and rollback ids store this form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Short human-friendly identifier such as `contract-1a2b3c4d`
pub fn short_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &raw[..8])
}

/// Truncate captured output to at most `max_bytes`, respecting char boundaries.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated {} bytes]", &text[..end], text.len() - end)
}
