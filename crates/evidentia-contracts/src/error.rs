//! Error types for the Evidentia delivery core.
//!
//! All fallible operations return `EvidentiaResult<T>`. Variants follow the
//! taxonomy operators reason about: validation, integrity, state conflicts,
//! transient collaborator failures and idempotency races. Each variant carries
//! enough context to produce an actionable ledger entry or log line.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable reason codes for state conflicts.
///
/// These strings are part of the external contract: API clients and the
/// evidence report rely on them not changing between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCode {
    /// The order is frozen for a dispute; delivery is halted.
    Frozen,
    /// The owning order has not reached `paid`.
    NotPaid,
    /// The stage was already released (ready or delivered).
    AlreadyReleased,
    /// The stage has been revoked.
    StageRevoked,
    /// The stage has not been released yet.
    NotReleased,
    /// The requested order status change is not in the transition table.
    InvalidTransition,
    /// Downloads were revoked for the order.
    DownloadsRevoked,
    /// The order is still inside its dispute retention period.
    RetentionActive,
    /// The redeem link was already used.
    AlreadyRedeemed,
    /// The redeem link has expired.
    LinkExpired,
    /// The order is not frozen, so it cannot be unfrozen.
    NotFrozen,
}

impl ConflictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frozen => "frozen",
            Self::NotPaid => "not_paid",
            Self::AlreadyReleased => "already_released",
            Self::StageRevoked => "stage_revoked",
            Self::NotReleased => "not_released",
            Self::InvalidTransition => "invalid_transition",
            Self::DownloadsRevoked => "downloads_revoked",
            Self::RetentionActive => "retention_active",
            Self::AlreadyRedeemed => "already_redeemed",
            Self::LinkExpired => "link_expired",
            Self::NotFrozen => "not_frozen",
        }
    }
}

impl fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type for the Evidentia core.
#[derive(Debug, Error)]
pub enum EvidentiaError {
    /// Malformed input: missing fields, unparsable token, bad range header.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A tamper-evidence or signature check failed.
    ///
    /// Integrity failures are never auto-corrected; they are surfaced to
    /// operators who decide whether a reseal or manual review is warranted.
    #[error("integrity violation: {reason}")]
    Integrity { reason: String },

    /// The operation is not allowed in the record's current state.
    #[error("state conflict [{code}]: {reason}")]
    StateConflict { code: ConflictCode, reason: String },

    /// Another appender won the race for this ledger position.
    ///
    /// Callers re-read the tail and retry; this never escapes the ledger
    /// unless the retry budget is exhausted.
    #[error("ledger sequence {sequence} already taken for order {order_id}")]
    SequenceConflict { order_id: String, sequence: u64 },

    /// A uniqueness constraint rejected the insert.
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// Key material, cipher text or signature could not be processed.
    #[error("crypto error: {reason}")]
    Crypto { reason: String },

    /// The backing store failed.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// An external collaborator (mailer, file store, geo lookup) failed.
    #[error("external service '{service}' failed: {reason}")]
    External { service: &'static str, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The caller is not allowed to perform this operation.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },
}

impl EvidentiaError {
    /// Shorthand for a `StateConflict`.
    pub fn conflict(code: ConflictCode, reason: impl Into<String>) -> Self {
        Self::StateConflict {
            code,
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for a poisoned-lock or backend failure.
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the Evidentia crates.
pub type EvidentiaResult<T> = Result<T, EvidentiaError>;
