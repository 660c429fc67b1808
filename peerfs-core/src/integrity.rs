//! Integrity: SHA-256 content fingerprints for chunks and whole files.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `payload`.
pub fn fingerprint(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Verify chunk payload against the expected hex fingerprint.
pub fn verify_chunk(payload: &[u8], expected: &str) -> bool {
    fingerprint(payload).eq_ignore_ascii_case(expected.trim())
}

/// Running whole-file digest, fed chunk by chunk.
#[derive(Default)]
pub struct FileHasher(Sha256);

impl FileHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.0.finalize())
    }
}
