//! Ledger event types.
//!
//! `LedgerEvent` is a single entry in an order's hash chain. Its payload is
//! stored as plain JSON so that verification always hashes exactly what was
//! persisted; `EventKind` is the typed view used when writing and reading
//! known event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{EvidentiaError, EvidentiaResult},
    order::OrderId,
    stage::StageId,
};

/// The `prev_hash` of the first event in every chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// One entry in an order's append-only hash chain.
///
/// Modifying any hashed field (order id, sequence, event type, payload,
/// prev hash, creation time) invalidates `event_hash` and every later
/// `prev_hash`, which verification detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,
    pub order_id: OrderId,
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    pub event_type: String,
    pub payload: Value,
    pub ip_masked: Option<String>,
    pub ip_encrypted: Option<String>,
    pub user_agent: Option<String>,
    /// External reference such as a provider event id.
    pub external_ref: Option<String>,
    /// Hash of the previous event, or `GENESIS_HASH`.
    pub prev_hash: String,
    pub event_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Request metadata attached to an appended event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    /// Raw client IP. Masked and encrypted before it is stored.
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub external_ref: Option<String>,
}

impl EventContext {
    /// Context for events triggered by the system itself.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn with_external_ref(external_ref: impl Into<String>) -> Self {
        Self {
            external_ref: Some(external_ref.into()),
            ..Self::default()
        }
    }
}

/// The closed vocabulary of ledger events with their payload schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum EventKind {
    #[serde(rename = "order.created")]
    OrderCreated {
        order_number: String,
        product_id: String,
        buyer_email: String,
        amount_minor: i64,
        currency: String,
        snapshot_hash: String,
        /// `checkout` or `manual`.
        source: String,
    },

    #[serde(rename = "terms.accepted")]
    TermsAccepted { version: String, terms_hash: String },

    #[serde(rename = "payment.captured")]
    PaymentCaptured {
        method: String,
        capture_id: Option<String>,
        amount_minor: i64,
        currency: String,
    },

    #[serde(rename = "payment.confirmed")]
    PaymentConfirmed {
        provider_event_id: String,
        capture_id: Option<String>,
    },

    #[serde(rename = "payment.refunded")]
    PaymentRefunded { provider_event_id: String },

    #[serde(rename = "payment.reversed")]
    PaymentReversed { provider_event_id: String },

    #[serde(rename = "dispute.created")]
    DisputeCreated {
        provider_event_id: String,
        dispute_id: Option<String>,
        reason: Option<String>,
    },

    #[serde(rename = "license.created")]
    LicenseCreated { license_key: String },

    #[serde(rename = "token.issued")]
    TokenIssued {
        token_hash_prefix: String,
        stage_id: Option<StageId>,
        expires_at: DateTime<Utc>,
        reason: String,
    },

    #[serde(rename = "stage.released")]
    StageReleased {
        stage_id: StageId,
        stage_order: u32,
        stage_type: String,
        file_key: String,
        file_sha256: String,
        released_by: String,
    },

    #[serde(rename = "stage.revoked")]
    StageRevoked {
        stage_id: StageId,
        revoked_by: String,
        reason: String,
    },

    #[serde(rename = "download.completed")]
    DownloadCompleted {
        token_hash_prefix: String,
        stage_id: Option<StageId>,
        file_key: String,
        file_sha256: String,
        bytes: u64,
        download_count: u32,
    },

    #[serde(rename = "download.resumed")]
    DownloadResumed {
        token_hash_prefix: String,
        stage_id: Option<StageId>,
        file_key: String,
        range_start: u64,
        range_end: u64,
    },

    #[serde(rename = "download.denied")]
    DownloadDenied {
        token_hash_prefix: String,
        reason: String,
    },

    #[serde(rename = "order.frozen")]
    OrderFrozen {
        frozen_by: String,
        reason: String,
        status_before: String,
        retention_expires_at: DateTime<Utc>,
    },

    #[serde(rename = "order.unfrozen")]
    OrderUnfrozen {
        unfrozen_by: String,
        restored_status: String,
    },

    #[serde(rename = "downloads.revoked")]
    DownloadsRevoked { revoked_by: String, reason: String },

    #[serde(rename = "notification.processed")]
    NotificationProcessed {
        provider_event_id: String,
        provider_event_type: String,
        outcome: String,
    },

    #[serde(rename = "email.sent")]
    EmailSent { template: String, message_id: String },

    #[serde(rename = "email.failed")]
    EmailFailed {
        template: String,
        error: String,
        attempts: u32,
    },

    #[serde(rename = "evidence.attached")]
    EvidenceAttached {
        attachment_id: Uuid,
        filename: String,
        sha256: String,
        uploaded_by: String,
    },

    #[serde(rename = "ledger.resealed")]
    LedgerResealed {
        reseal_id: Uuid,
        resealed_by: String,
        events_rewritten: u64,
        archived_terminal_hash: String,
        archive_digest: String,
    },

    #[serde(rename = "redeem.confirmed")]
    RedeemConfirmed { sale_id: Uuid },
}

impl EventKind {
    /// Every event type string with a typed schema.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "order.created",
        "terms.accepted",
        "payment.captured",
        "payment.confirmed",
        "payment.refunded",
        "payment.reversed",
        "dispute.created",
        "license.created",
        "token.issued",
        "stage.released",
        "stage.revoked",
        "download.completed",
        "download.resumed",
        "download.denied",
        "order.frozen",
        "order.unfrozen",
        "downloads.revoked",
        "notification.processed",
        "email.sent",
        "email.failed",
        "evidence.attached",
        "ledger.resealed",
        "redeem.confirmed",
    ];

    pub fn is_known(event_type: &str) -> bool {
        Self::KNOWN_TYPES.contains(&event_type)
    }

    /// Split into the `(event_type, payload)` pair stored in the ledger.
    pub fn to_parts(&self) -> EvidentiaResult<(String, Value)> {
        let tagged = serde_json::to_value(self).map_err(|e| {
            EvidentiaError::validation(format!("event payload not serializable: {e}"))
        })?;
        let Value::Object(mut map) = tagged else {
            return Err(EvidentiaError::validation("tagged event is not a JSON object"));
        };
        let event_type = match map.remove("event_type") {
            Some(Value::String(s)) => s,
            _ => return Err(EvidentiaError::validation("tagged event has no event_type")),
        };
        let payload = map.remove("payload").unwrap_or(Value::Null);
        Ok((event_type, payload))
    }
}

/// A decoded ledger entry: a known typed event or a forward-compatible
/// catch-all.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    Known(EventKind),
    Other { event_type: String, payload: Value },
}

impl TypedEvent {
    /// Decode a stored `(event_type, payload)` pair.
    ///
    /// Known types must match their schema exactly; a known type with a
    /// malformed payload is a validation error, not an `Other`.
    pub fn decode(event_type: &str, payload: &Value) -> EvidentiaResult<Self> {
        if !EventKind::is_known(event_type) {
            return Ok(Self::Other {
                event_type: event_type.to_string(),
                payload: payload.clone(),
            });
        }
        let tagged = serde_json::json!({ "event_type": event_type, "payload": payload });
        serde_json::from_value(tagged)
            .map(Self::Known)
            .map_err(|e| {
                EvidentiaError::validation(format!(
                    "payload does not match schema for '{event_type}': {e}"
                ))
            })
    }
}

/// Why a chain failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreak {
    /// The stored `event_hash` differs from the recomputed one.
    HashMismatch,
    /// The stored `prev_hash` differs from the previous event's hash.
    PrevHashMismatch,
    /// Sequence numbers are not contiguous from 1.
    SequenceGap,
}

/// Result of replaying an order's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub total_events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at_sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ChainBreak>,
}

impl ChainVerification {
    pub fn intact(total_events: u64) -> Self {
        Self {
            valid: true,
            total_events,
            broken_at_sequence: None,
            expected_hash: None,
            actual_hash: None,
            reason: None,
        }
    }
}

/// A superseded hash pair kept when a chain is resealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedHash {
    pub sequence: u64,
    pub prev_hash: String,
    pub event_hash: String,
}

/// Immutable archive of a chain's hashes as they were before a reseal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResealRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub resealed_by: String,
    pub resealed_at: DateTime<Utc>,
    pub rows: Vec<ArchivedHash>,
    /// `event_hash` of the last event before the reseal.
    pub archived_terminal_hash: String,
    /// SHA-256 over the canonical JSON of `rows`.
    pub archive_digest: String,
}

/// Result of a reseal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResealOutcome {
    pub resealed: bool,
    pub chain_valid_after: bool,
    pub events_rewritten: u64,
    pub reseal_id: Uuid,
    pub archived_terminal_hash: String,
}
