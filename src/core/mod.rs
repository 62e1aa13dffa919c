//! Core primitives.
//!
//! Digests and key generation shared by the store adapters and the
//! economy code. Nothing here touches I/O.

pub mod hash;
pub mod ids;

// Re-export core types
pub use hash::{content_tag, hashes_match, trust_hash, ContentHasher, ContentTag};
pub use ids::{push_id, push_ids};
