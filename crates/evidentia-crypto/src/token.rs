//! Signed download tokens and redeem-link hashing.
//!
//! A raw download token is three base64url segments joined by `.`:
//!
//! ```text
//! base64url(payload JSON) . base64url(16-byte nonce) . base64url(HMAC-SHA256)
//! ```
//!
//! The MAC covers the first two segments exactly as transmitted. The raw
//! token leaves the process only inside a download URL; storage keeps
//! `SHA256(raw_token)`.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    hash::sha256_hex,
    mac::{hmac_sha256, hmac_sha256_hex, verify_hmac_sha256},
    random::random_array,
};

const NONCE_LEN: usize = 16;

/// Claims carried inside a download token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub order_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<Uuid>,
    /// Expiry as Unix seconds.
    pub exp: i64,
}

impl TokenPayload {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// A freshly minted token. The raw form must go to the buyer and nowhere else.
#[derive(Clone)]
pub struct IssuedToken {
    pub raw_token: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("raw_token", &"<redacted>")
            .field("token_hash", &self.token_hash)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Why a raw token failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    /// Wrong number of segments or undecodable base64/JSON.
    Malformed,
    /// The MAC does not match.
    BadSignature,
    /// Signature is valid but `exp` has passed. The claims are trustworthy.
    Expired(TokenPayload),
}

/// Mints and verifies HMAC-signed download tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Mint a token for an order, optionally scoped to one stage.
    pub fn issue(
        &self,
        order_id: Uuid,
        stage_id: Option<Uuid>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> IssuedToken {
        // Whole seconds so the stored expiry equals the signed `exp`.
        let expires_at = Utc
            .timestamp_opt((now + ttl).timestamp(), 0)
            .single()
            .unwrap_or(now + ttl);
        let payload = TokenPayload {
            order_id,
            stage_id,
            exp: expires_at.timestamp(),
        };
        // TokenPayload holds only a uuid, an optional uuid and an integer.
        let payload_json = serde_json::to_vec(&payload).unwrap_or_default();
        let nonce: [u8; NONCE_LEN] = random_array();

        let signed_part = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload_json),
            URL_SAFE_NO_PAD.encode(nonce)
        );
        let signature = hmac_sha256(&self.secret, signed_part.as_bytes());
        let raw_token = format!("{signed_part}.{}", URL_SAFE_NO_PAD.encode(signature));
        let token_hash = hash_token(&raw_token);

        IssuedToken {
            raw_token,
            token_hash,
            expires_at,
        }
    }

    /// Check structure, signature and expiry of a raw token.
    ///
    /// A valid signature is necessary but not sufficient: the caller still
    /// looks the token hash up in storage.
    pub fn verify(&self, raw_token: &str, now: DateTime<Utc>) -> Result<TokenPayload, TokenRejection> {
        let mut parts = raw_token.split('.');
        let (Some(payload_b64), Some(nonce_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenRejection::Malformed);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenRejection::Malformed)?;
        let signed_len = payload_b64.len() + 1 + nonce_b64.len();
        let signed_part = &raw_token[..signed_len];
        if !verify_hmac_sha256(&self.secret, signed_part.as_bytes(), &signature) {
            return Err(TokenRejection::BadSignature);
        }

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenRejection::Malformed)?;
        let payload: TokenPayload =
            serde_json::from_slice(&payload_json).map_err(|_| TokenRejection::Malformed)?;

        if payload.exp <= now.timestamp() {
            return Err(TokenRejection::Expired(payload));
        }
        Ok(payload)
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").field("secret", &"<redacted>").finish()
    }
}

/// The storage key of a raw download token.
pub fn hash_token(raw_token: &str) -> String {
    sha256_hex(raw_token.as_bytes())
}

/// Hashes human-facing redeem tokens.
///
/// Uses a salt separate from the download-token secret so the two schemes
/// can never be confused.
#[derive(Clone)]
pub struct RedeemHasher {
    salt: Vec<u8>,
}

impl RedeemHasher {
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn hash(&self, raw_token: &str) -> String {
        hmac_sha256_hex(&self.salt, raw_token.as_bytes())
    }
}

impl fmt::Debug for RedeemHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeemHasher").field("salt", &"<redacted>").finish()
    }
}
