//! Payment-provider notification log.
//!
//! One row per provider event id. The uniqueness of that id is the
//! idempotency guard: a second insert for the same id fails, and the
//! ingester answers success without reprocessing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::OrderId;

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// Row claimed; processing has not finished.
    Received,
    /// The event drove a state transition.
    Processed,
    /// Unrecognised event type; nothing to do.
    Ignored,
    /// Recognised type, but no order matched its references.
    NoMatchingOrder,
    /// The provider signature did not verify.
    InvalidSignature,
    /// An order matched but the transition was not allowed from its status.
    TransitionRejected,
    /// The envelope carried an id but failed structural validation.
    Malformed,
    /// Processing stopped on a store, ledger or verifier failure. A retry
    /// of the same event id is processed again.
    Failed,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processed => "processed",
            Self::Ignored => "ignored",
            Self::NoMatchingOrder => "no_matching_order",
            Self::InvalidSignature => "invalid_signature",
            Self::TransitionRejected => "transition_rejected",
            Self::Malformed => "malformed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NotificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency record for one provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLog {
    /// Provider-assigned event id. Unique.
    pub event_id: String,
    pub event_type: String,
    /// The raw request body, byte-for-byte as received (UTF-8).
    pub raw_payload: String,
    /// `None` until the signature has been checked.
    pub signature_valid: Option<bool>,
    pub outcome: NotificationOutcome,
    pub order_id: Option<OrderId>,
    /// Operator-facing diagnostic text.
    pub detail: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl NotificationLog {
    /// A later delivery of this event id may take the row over: the
    /// signature failed or processing stopped on an outage.
    pub fn is_reclaimable(&self) -> bool {
        self.signature_valid == Some(false) || self.outcome == NotificationOutcome::Failed
    }
}
