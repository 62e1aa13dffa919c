//! Credential and Content Hashing
//!
//! Provides the two digests the server relies on:
//! - Trust hashes handed to privileged callers after a platform login
//! - Content tags used as ETags for conditional store writes

use md5::Md5;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Content tag output (hex-encoded SHA-256).
pub type ContentTag = String;

/// Derive the trust hash for a scope.
///
/// `md5(scope + platform_token + salt)`, lowercase hex. The concatenation order
/// is part of the persisted format.
pub fn trust_hash(scope: &str, platform_token: &str, salt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(scope.as_bytes());
    hasher.update(platform_token.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a stored hash with a caller-supplied one.
///
/// Hex may arrive in either case. Runs over the full length regardless of
/// where the first difference is.
pub fn hashes_match(stored: &str, provided: &str) -> bool {
    let stored = stored.as_bytes();
    let provided = provided.trim().as_bytes();
    if stored.is_empty() || stored.len() != provided.len() {
        return false;
    }

    stored
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| {
            acc | (a.to_ascii_lowercase() ^ b.to_ascii_lowercase())
        })
        == 0
}

/// Hasher for store nodes.
///
/// Wraps SHA-256 with a domain separator so tags from different
/// stores never collide with other digests.
pub struct ContentHasher {
    hasher: Sha256,
}

impl ContentHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for store nodes.
    pub fn for_store_node() -> Self {
        Self::new(b"PUCK_RUSH_NODE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a JSON value.
    ///
    /// `serde_json` maps are sorted, so equal trees hash equally.
    pub fn update_json(&mut self, value: &Value) {
        // Serializing a `Value` cannot fail.
        let encoded = serde_json::to_vec(value).unwrap_or_default();
        self.update_u64(encoded.len() as u64);
        self.update_bytes(&encoded);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the hex-encoded tag.
    pub fn finalize(self) -> ContentTag {
        hex::encode(self.hasher.finalize())
    }
}

/// Compute the content tag of a store node. An absent node has its own tag.
pub fn content_tag(value: Option<&Value>) -> ContentTag {
    let mut hasher = ContentHasher::for_store_node();
    match value {
        Some(value) => {
            hasher.update_bytes(&[1]);
            hasher.update_json(value);
        }
        None => hasher.update_bytes(&[0]),
    }
    hasher.finalize()
}
