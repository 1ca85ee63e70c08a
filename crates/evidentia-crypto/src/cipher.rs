//! Symmetric encryption of personal data at rest.
//!
//! Client IPs are stored twice: masked for display and encrypted for
//! operator recovery. The encrypted form is `base64(nonce ‖ ciphertext)`
//! with a fresh 96-bit nonce per message.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{error::CryptoError, random::random_array};

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for PII fields.
#[derive(Clone)]
pub struct PiiCipher {
    key: [u8; 32],
}

impl PiiCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Build from a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("pii key is not hex: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidKey(format!("pii key must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let nonce_bytes: [u8; NONCE_LEN] = random_array();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Encrypt a string field and encode it as base64.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CryptoError> {
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let plaintext = self.decrypt(&data)?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

impl fmt::Debug for PiiCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiiCipher").field("key", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PiiCipher {
        PiiCipher::new([7u8; 32])
    }

    #[test]
    fn string_round_trip() {
        let c = cipher();
        let sealed = c.encrypt_str("203.0.113.42").unwrap();
        assert_ne!(sealed, "203.0.113.42");
        assert_eq!(c.decrypt_str(&sealed).unwrap(), "203.0.113.42");
    }

    #[test]
    fn same_plaintext_encrypts_differently_each_time() {
        let c = cipher();
        let a = c.encrypt_str("198.51.100.7").unwrap();
        let b = c.encrypt_str("198.51.100.7").unwrap();
        assert_ne!(a, b, "nonces must be fresh per message");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let c = cipher();
        let mut sealed = c.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(c.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = cipher().encrypt(b"secret").unwrap();
        let other = PiiCipher::new([8u8; 32]);
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn from_hex_rejects_short_keys() {
        match PiiCipher::from_hex("00ff") {
            Err(CryptoError::InvalidKey(msg)) => assert!(msg.contains("32 bytes")),
            other => panic!("expected InvalidKey, got {:?}", other),
        }
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let rendered = format!("{:?}", cipher());
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("7, 7"));
    }
}
