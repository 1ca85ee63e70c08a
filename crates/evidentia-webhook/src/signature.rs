//! Provider signature verification.
//!
//! The provider signs `"{timestamp}.{raw body}"` with HMAC-SHA256 under the
//! shared webhook secret and sends
//!
//!   x-provider-signature: t=<unix seconds>,v1=<hex mac>
//!
//! Several `v1` entries may be present during secret rotation; any match
//! verifies. Timestamps outside the tolerance window are rejected.

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use evidentia_contracts::EvidentiaResult;
use evidentia_core::traits::{Clock, ProviderVerifier};
use evidentia_crypto::{hmac_sha256_hex, verify_hmac_sha256};

/// Name of the HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-provider-signature";

/// HMAC-SHA256 verifier for the `t=..,v1=..` header format.
pub struct HmacProviderVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl HmacProviderVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
            clock,
        }
    }

    /// Produce a header value for `body` at `timestamp`.
    pub fn sign(&self, body: &[u8], timestamp: i64) -> String {
        format!("t={timestamp},v1={}", hmac_sha256_hex(&self.secret, &signed_message(timestamp, body)))
    }
}

fn signed_message(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut message = format!("{timestamp}.").into_bytes();
    message.extend_from_slice(body);
    message
}

/// Split a header into its timestamp and candidate tags.
fn parse_header(header: &str) -> Option<(i64, Vec<Vec<u8>>)> {
    let mut timestamp = None;
    let mut tags = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = Some(value.parse().ok()?),
            "v1" => tags.push(hex::decode(value).ok()?),
            _ => {}
        }
    }
    if tags.is_empty() {
        return None;
    }
    Some((timestamp?, tags))
}

impl ProviderVerifier for HmacProviderVerifier {
    fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> EvidentiaResult<bool> {
        let Some(header) = signature_header else {
            debug!("notification has no signature header");
            return Ok(false);
        };
        let Some((timestamp, tags)) = parse_header(header) else {
            debug!("notification signature header is malformed");
            return Ok(false);
        };

        let now = self.clock.now().timestamp();
        if (now - timestamp).abs() > self.tolerance.num_seconds() {
            debug!(timestamp, now, "notification signature outside tolerance");
            return Ok(false);
        }

        let message = signed_message(timestamp, raw_body);
        Ok(tags
            .iter()
            .any(|tag| verify_hmac_sha256(&self.secret, &message, tag)))
    }
}
