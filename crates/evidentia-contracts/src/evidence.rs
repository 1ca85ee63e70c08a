//! Operator-supplied evidence and manual sales.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{Money, OrderId, ProductSnapshot};

/// A supporting file (screenshot, receipt) attached to an order.
///
/// Purely additive: no delivery invariant depends on attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceAttachment {
    pub id: Uuid,
    pub order_id: OrderId,
    pub file_key: String,
    pub filename: String,
    pub content_type: String,
    pub sha256: String,
    pub size: u64,
    pub uploaded_by: String,
    #[serde(default)]
    pub note: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A sale created by an operator and delivered through a redeem link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualSale {
    pub id: Uuid,
    /// Salted HMAC (hex) of the raw redeem token. Distinct from the
    /// download-token hashing scheme.
    pub link_hash: String,
    pub product: ProductSnapshot,
    pub buyer_email: String,
    pub amount: Money,
    pub download_limit: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub order_id: Option<OrderId>,
}
