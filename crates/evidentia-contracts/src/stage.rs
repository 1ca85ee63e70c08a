//! Delivery stages of a staged product.
//!
//! A stage moves `pending → ready → delivered`, or to the terminal
//! `revoked`. Only the release action moves a stage out of `pending`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{FileRef, OrderId};

/// Unique identifier of a delivery stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(pub Uuid);

impl StageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Ready,
    Delivered,
    Revoked,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Delivered => "delivered",
            Self::Revoked => "revoked",
        }
    }

    /// True once the stage has been released to the buyer.
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Ready | Self::Delivered)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One releasable unit of a multi-part product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStage {
    pub id: StageId,
    pub order_id: OrderId,
    pub stage_order: u32,
    /// e.g. `preview`, `full`, `source`.
    pub stage_type: String,
    pub status: StageStatus,
    pub file: FileRef,
    pub download_count: u32,
    pub download_limit: u32,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
