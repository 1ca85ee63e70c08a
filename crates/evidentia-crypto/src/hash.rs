//! SHA-256 helpers. Every digest in Evidentia is lowercase hex.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{canonical::CanonicalBytes, error::CryptoError};

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// SHA-256 over the canonical JSON of `value`.
pub fn canonical_sha256(value: &impl Serialize) -> Result<String, CryptoError> {
    let bytes = CanonicalBytes::new(value)?;
    Ok(sha256_hex(bytes))
}

/// Incremental SHA-256 for content that arrives in chunks.
#[derive(Default)]
pub struct StreamingDigest(Sha256);

impl StreamingDigest {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}
