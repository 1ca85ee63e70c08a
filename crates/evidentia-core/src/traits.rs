//! Storage and collaborator seams for the Evidentia core.
//!
//! Stores are the trusted persistence boundary:
//!
//! - `DeliveryStore`     orders, stages and download tokens (one transactional unit)
//! - `NotificationStore` provider notification idempotency log
//! - `AttachmentStore`   operator-supplied evidence files
//! - `SaleStore`         manual sales and their redeem links
//!
//! Collaborators are external services consumed only at their boundary:
//! `FileStore`, `Mailer`, `GeoResolver`, `SettingsProvider`,
//! `ProviderVerifier` and `Clock`.
//!
//! Every `update_*`/`modify_*` method takes a closure and must apply it
//! atomically: the closure sees the current rows, and its changes are
//! persisted only if it returns `Ok`. This is how read-check-write sequences
//! (token consumption, stage release, freeze) avoid races.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use evidentia_contracts::{
    evidence::{EvidenceAttachment, ManualSale},
    notification::NotificationLog,
    token::DownloadToken,
    DeliveryStage, EvidentiaResult, Order, OrderId, StageId,
};
use uuid::Uuid;

use crate::range::ByteRange;

// ── Stores ────────────────────────────────────────────────────────────────────

/// The rows touched by one download, loaded and written back together.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecords {
    pub token: DownloadToken,
    pub order: Order,
    pub stage: Option<DeliveryStage>,
}

/// Rows removed by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub orders: u64,
    pub stages: u64,
    pub tokens: u64,
}

/// Orders, delivery stages and download tokens.
pub trait DeliveryStore: Send + Sync {
    /// Insert a new order together with its stages.
    ///
    /// Fails with `Duplicate` if the id or order number already exists.
    fn insert_order(&self, order: Order, stages: Vec<DeliveryStage>) -> EvidentiaResult<()>;

    fn order(&self, id: &OrderId) -> EvidentiaResult<Option<Order>>;

    /// Find an order by provider order id or capture id.
    fn find_order_by_payment_ref(&self, reference: &str) -> EvidentiaResult<Option<Order>>;

    /// Atomically modify one order. Fails with `NotFound` if it is missing.
    fn update_order(
        &self,
        id: &OrderId,
        apply: &mut dyn FnMut(&mut Order) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<Order>;

    fn stage(&self, id: &StageId) -> EvidentiaResult<Option<DeliveryStage>>;

    /// Stages of an order, ordered by `stage_order`.
    fn stages_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<DeliveryStage>>;

    /// Atomically modify one stage while observing its owning order.
    ///
    /// The order cannot change while `apply` runs.
    fn update_stage(
        &self,
        id: &StageId,
        apply: &mut dyn FnMut(&Order, &mut DeliveryStage) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<DeliveryStage>;

    /// Persist a token row once `admit` accepts the current order and, for
    /// stage tokens, the stage.
    ///
    /// The check and the insert are one atomic step: a freeze or revocation
    /// that commits first always keeps the row out. Fails with `NotFound` if
    /// the order or stage is missing.
    fn insert_token(
        &self,
        token: DownloadToken,
        admit: &mut dyn FnMut(&Order, Option<&DeliveryStage>) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<()>;

    fn token(&self, token_hash: &str) -> EvidentiaResult<Option<DownloadToken>>;

    fn tokens_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<DownloadToken>>;

    /// Atomically load the token, its order and its stage, apply the
    /// closure and write all three back.
    ///
    /// This is the single serialization point for download consumption:
    /// two concurrent calls for the same order never both observe the
    /// pre-increment counter.
    fn modify_download(
        &self,
        token_hash: &str,
        apply: &mut dyn FnMut(&mut DownloadRecords) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<DownloadRecords>;

    /// Delete an order and every stage and token that belongs to it.
    fn purge_order(&self, order_id: &OrderId) -> EvidentiaResult<PurgeCounts>;
}

/// Result of claiming a provider event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationClaim {
    /// The row was inserted; the caller owns processing.
    Claimed,
    /// A row already exists for this event id.
    Duplicate(NotificationLog),
}

/// Provider notification log keyed by provider event id.
pub trait NotificationStore: Send + Sync {
    /// Insert a row unless one already exists for `log.event_id`.
    fn claim_notification(&self, log: NotificationLog) -> EvidentiaResult<NotificationClaim>;

    /// Re-open a row whose signature failed or whose processing failed.
    ///
    /// Succeeds only when the stored row is
    /// [`is_reclaimable`](NotificationLog::is_reclaimable); the row is reset
    /// to `received` with the new raw payload. Returns `false` otherwise.
    fn reclaim_retryable(
        &self,
        event_id: &str,
        raw_payload: &str,
        received_at: DateTime<Utc>,
    ) -> EvidentiaResult<bool>;

    fn update_notification(
        &self,
        event_id: &str,
        apply: &mut dyn FnMut(&mut NotificationLog),
    ) -> EvidentiaResult<NotificationLog>;

    fn notification(&self, event_id: &str) -> EvidentiaResult<Option<NotificationLog>>;

    fn notifications_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<NotificationLog>>;

    /// Delete rows matched to an order. Returns the number removed.
    fn purge_notifications(&self, order_id: &OrderId) -> EvidentiaResult<u64>;
}

/// Operator-supplied evidence files.
pub trait AttachmentStore: Send + Sync {
    fn insert_attachment(&self, attachment: EvidenceAttachment) -> EvidentiaResult<()>;

    fn attachments_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<EvidenceAttachment>>;

    /// Delete and return every attachment of an order.
    fn purge_attachments(&self, order_id: &OrderId) -> EvidentiaResult<Vec<EvidenceAttachment>>;
}

/// Manual sales and their redeem links.
pub trait SaleStore: Send + Sync {
    fn insert_sale(&self, sale: ManualSale) -> EvidentiaResult<()>;

    fn sale_by_link_hash(&self, link_hash: &str) -> EvidentiaResult<Option<ManualSale>>;

    /// Atomically modify one sale. Fails with `NotFound` if it is missing.
    fn update_sale(
        &self,
        id: &Uuid,
        apply: &mut dyn FnMut(&mut ManualSale) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<ManualSale>;
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Metadata returned by `FileStore::head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

/// A lazily read file body. Dropping it ends the read.
pub type FileChunks = Box<dyn Iterator<Item = EvidentiaResult<Vec<u8>>> + Send>;

/// Object storage for product files and evidence attachments.
pub trait FileStore: Send + Sync {
    fn upload(&self, key: &str, content: &[u8], content_type: &str) -> EvidentiaResult<()>;

    /// `None` if no object exists under `key`.
    fn head(&self, key: &str) -> EvidentiaResult<Option<FileMeta>>;

    /// Open the object, optionally restricted to an inclusive byte range.
    fn stream(&self, key: &str, range: Option<ByteRange>) -> EvidentiaResult<FileChunks>;

    fn delete(&self, key: &str) -> EvidentiaResult<()>;
}

/// One outbound message. Rendering happens in the mailer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMail {
    pub template: String,
    pub recipient: String,
    pub data: Value,
}

/// Outbound email. Failures are reported, never fatal to delivery.
pub trait Mailer: Send + Sync {
    /// Send a message and return the provider's message id.
    fn send(&self, mail: &OutgoingMail) -> EvidentiaResult<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Best-effort IP geolocation.
pub trait GeoResolver: Send + Sync {
    fn locate(&self, ip: &str) -> Option<GeoLocation>;
}

/// Store identity shown in outbound messages and evidence reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIdentity {
    pub name: String,
    pub support_email: String,
    pub legal_name: String,
}

pub trait SettingsProvider: Send + Sync {
    fn store_identity(&self) -> StoreIdentity;
}

/// Verifies that a notification really came from the payment provider.
pub trait ProviderVerifier: Send + Sync {
    /// Return `Ok(false)` for a bad signature and `Err` only when the
    /// verification service itself failed.
    fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> EvidentiaResult<bool>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
