//! Order, snapshot and buyer types.
//!
//! An `Order` is one purchase transaction. Its `status` only ever changes
//! through the delivery state machine; the transition table lives here so
//! every crate agrees on it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Create a new, random order ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Payment and delivery status of an order.
///
/// `Frozen` is an overlay entered only through an explicit operator action;
/// the status it replaced is kept in `FreezeRecord::status_before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Confirmed,
    Refunded,
    Disputed,
    Frozen,
    Revoked,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Confirmed => "confirmed",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
            Self::Frozen => "frozen",
            Self::Revoked => "revoked",
        }
    }

    /// Return true if `next` is reachable from `self` by a payment transition.
    ///
    /// Entering and leaving `Frozen` is not a payment transition and is never
    /// allowed here; use the freeze/unfreeze operations instead.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Revoked)
                | (Paid, Confirmed)
                | (Paid, Refunded)
                | (Paid, Disputed)
                | (Paid, Revoked)
                | (Confirmed, Refunded)
                | (Confirmed, Disputed)
                | (Confirmed, Revoked)
                | (Disputed, Confirmed)
                | (Disputed, Refunded)
                | (Disputed, Revoked)
                | (Refunded, Disputed)
                | (Refunded, Revoked)
        )
    }

    /// True for statuses in which payment has been captured and not reversed.
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid | Self::Confirmed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount in integer minor units (cents) with its ISO currency code.
///
/// Floats never enter a hash, so amounts are integers throughout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

/// A file held in the external file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Object key in the file store.
    pub key: String,
    /// Filename presented to the buyer in `Content-Disposition`.
    pub filename: String,
    /// Lowercase hex SHA-256 of the file content.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// One planned stage of a staged product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub stage_order: u32,
    pub stage_type: String,
    pub file: FileRef,
    /// Per-stage download cap; falls back to the configured default.
    #[serde(default)]
    pub download_limit: Option<u32>,
}

/// The product exactly as it was presented to the buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub license_terms: Option<String>,
    #[serde(default)]
    pub staged: bool,
    #[serde(default)]
    pub stages: Vec<StagePlan>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Immutable point-in-time capture of the purchased product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub product: ProductSnapshot,
    /// SHA-256 (hex) of the canonical JSON of `product`.
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
}

/// Buyer contact details. The raw IP is never stored in clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerContact {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip_masked: Option<String>,
    /// AES-256-GCM cipher text (base64) of the raw IP.
    #[serde(default)]
    pub ip_encrypted: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// References into the payment provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefs {
    /// `provider` for checkout orders, `manual` for redeemed manual sales.
    pub method: String,
    #[serde(default)]
    pub provider_order_id: Option<String>,
    #[serde(default)]
    pub capture_id: Option<String>,
}

/// Record of the buyer accepting the license terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsAcceptance {
    pub version: String,
    /// SHA-256 (hex) of the exact terms text shown.
    pub terms_hash: String,
    #[serde(default)]
    pub ip_masked: Option<String>,
    pub accepted_at: DateTime<Utc>,
}

/// Dispute-freeze overlay details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeRecord {
    pub frozen_at: DateTime<Utc>,
    pub frozen_by: String,
    pub reason: String,
    /// The status the order had before the freeze, restored on unfreeze.
    pub status_before: OrderStatus,
}

/// One purchase transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order number, e.g. `EV-20260101-1A2B3C`.
    pub order_number: String,
    pub product_id: String,
    pub buyer: BuyerContact,
    pub amount: Money,
    pub status: OrderStatus,
    pub payment: PaymentRefs,
    pub download_count: u32,
    pub download_limit: u32,
    /// End of the download window; `None` means no window.
    pub download_expires_at: Option<DateTime<Utc>>,
    pub downloads_revoked: bool,
    pub freeze: Option<FreezeRecord>,
    /// Earliest date at which the order may be purged.
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub terms: Option<TermsAcceptance>,
    pub license_key: Option<String>,
    /// A bundled delivery archive, preferred over the snapshot's first file.
    pub delivery_package: Option<FileRef>,
    pub staged: bool,
    pub snapshot: OrderSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// True while the dispute-freeze overlay is active.
    pub fn is_frozen(&self) -> bool {
        self.status == OrderStatus::Frozen || self.freeze.is_some()
    }

    /// True once the download window has closed.
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.download_expires_at.is_some_and(|exp| exp <= now)
    }

    /// The status that payment transitions operate on.
    ///
    /// While frozen this is the status from before the freeze.
    pub fn payment_status(&self) -> OrderStatus {
        match &self.freeze {
            Some(record) => record.status_before,
            None => self.status,
        }
    }
}
