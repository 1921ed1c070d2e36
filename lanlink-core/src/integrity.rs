//! End-to-end integrity: hex sha-256 digests of transferred content.

use sha2::{Digest, Sha256};

/// Hex sha-256 of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    to_hex(hasher.finalize().as_slice())
}

/// Incremental sha-256 for content too large to hold in memory. The sender
/// feeds it from a second read of the file, so the digest covers what is on
/// disk rather than what was buffered for sending.
pub struct StreamingHash {
    inner: Sha256,
}

impl StreamingHash {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> String {
        to_hex(self.inner.finalize().as_slice())
    }
}

impl Default for StreamingHash {
    fn default() -> Self {
        Self::new()
    }
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
