use evidentia_contracts::EvidentiaError;
use thiserror::Error;

/// Failures of the crypto primitives.
///
/// None of these messages ever contain key material, raw tokens or
/// plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("float values are not allowed in canonical JSON: {0}")]
    FloatRejected(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("malformed encoding: {0}")]
    Encoding(String),
}

impl From<CryptoError> for EvidentiaError {
    fn from(err: CryptoError) -> Self {
        EvidentiaError::Crypto {
            reason: err.to_string(),
        }
    }
}
