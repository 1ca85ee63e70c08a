//! Persisted download-token rows.
//!
//! Only the SHA-256 of the raw token is ever stored. A database read alone
//! therefore cannot reconstruct a usable download link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{order::OrderId, stage::StageId};

/// Number of hex characters of the token hash written to the ledger.
pub const TOKEN_HASH_PREFIX_LEN: usize = 12;

/// Storage record for an issued download token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadToken {
    /// Lowercase hex SHA-256 of the raw token.
    pub token_hash: String,
    pub order_id: OrderId,
    pub stage_id: Option<StageId>,
    pub expires_at: DateTime<Utc>,
    /// When true the first full download consumes the token.
    pub single_use: bool,
    /// Set when the token is consumed.
    pub used_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    /// Why the token was minted: `checkout`, `redeem`, `stage_release`, `reissue`.
    pub reason: String,
}

impl DownloadToken {
    pub fn is_consumed(&self) -> bool {
        self.single_use && self.used_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The prefix of the token hash that is safe to log and audit.
    pub fn hash_prefix(&self) -> &str {
        hash_prefix(&self.token_hash)
    }
}

/// Truncate a token hash to its auditable prefix.
pub fn hash_prefix(token_hash: &str) -> &str {
    let end = token_hash.len().min(TOKEN_HASH_PREFIX_LEN);
    &token_hash[..end]
}
