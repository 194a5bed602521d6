//! Content hashing for cache keys and derived identifiers.

use sha2::{Digest, Sha256};

/// SHA-256 of a byte slice as lower-case hex.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
