//! Evidence report compiler.
//!
//! Gathers everything known about one order into a structured document an
//! operator can attach to a dispute response. Read-only: compiling a report
//! never writes to any store or to the ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use evidentia_contracts::{
    event::ChainVerification,
    evidence::EvidenceAttachment,
    notification::{NotificationLog, NotificationOutcome},
    order::{FreezeRecord, ProductSnapshot, TermsAcceptance},
    token::hash_prefix,
    DeliveryStage, EvidentiaError, EvidentiaResult, LedgerEvent, OrderId, OrderStatus, StageId,
};
use evidentia_crypto::canonical_sha256;

use crate::{
    context::CoreContext,
    traits::{GeoLocation, StoreIdentity},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceReport {
    pub generated_at: DateTime<Utc>,
    pub store: StoreIdentity,
    pub order: OrderSummary,
    pub snapshot: SnapshotEvidence,
    pub terms: Option<TermsAcceptance>,
    pub chain: ChainVerification,
    pub timeline: Vec<TimelineEntry>,
    pub tokens: Vec<TokenRecord>,
    pub downloads: DownloadSummary,
    pub stages: Vec<DeliveryStage>,
    pub notifications: Vec<NotificationSummary>,
    pub attachments: Vec<EvidenceAttachment>,
    pub reseals: Vec<ResealSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: OrderStatus,
    pub buyer_email: String,
    pub buyer_name: Option<String>,
    pub ip_masked: Option<String>,
    /// Decrypted client IP; present only when PII was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method: String,
    pub provider_order_id: Option<String>,
    pub capture_id: Option<String>,
    pub license_key: Option<String>,
    pub download_count: u32,
    pub download_limit: u32,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub downloads_revoked: bool,
    pub freeze: Option<FreezeRecord>,
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvidence {
    pub content_hash: String,
    pub recomputed_hash: Option<String>,
    /// True when the stored snapshot still hashes to `content_hash`.
    pub hash_matches: bool,
    pub captured_at: DateTime<Utc>,
    pub product: ProductSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub sequence: u64,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
    pub ip_masked: Option<String>,
    pub location: Option<GeoLocation>,
    pub user_agent: Option<String>,
    pub external_ref: Option<String>,
    pub event_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token_hash_prefix: String,
    pub stage_id: Option<StageId>,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSummary {
    pub completed: u64,
    pub resumed: u64,
    pub denied: u64,
    pub denial_reasons: BTreeMap<String, u64>,
    pub first_download_at: Option<DateTime<Utc>>,
    pub last_download_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub event_id: String,
    pub event_type: String,
    pub signature_valid: Option<bool>,
    pub outcome: NotificationOutcome,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<NotificationLog> for NotificationSummary {
    fn from(log: NotificationLog) -> Self {
        Self {
            event_id: log.event_id,
            event_type: log.event_type,
            signature_valid: log.signature_valid,
            outcome: log.outcome,
            received_at: log.received_at,
            processed_at: log.processed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResealSummary {
    pub id: Uuid,
    pub resealed_by: String,
    pub resealed_at: DateTime<Utc>,
    pub archived_terminal_hash: String,
    pub archive_digest: String,
    pub archived_rows: usize,
}

/// Compiles `EvidenceReport`s.
#[derive(Clone)]
pub struct EvidenceCompiler {
    ctx: CoreContext,
}

impl EvidenceCompiler {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub fn compile(&self, order_id: &OrderId, include_pii: bool) -> EvidentiaResult<EvidenceReport> {
        let order = self
            .ctx
            .delivery_store
            .order(order_id)?
            .ok_or_else(|| EvidentiaError::not_found("order", order_id))?;

        let recomputed_hash = canonical_sha256(&order.snapshot.product).ok();
        let snapshot = SnapshotEvidence {
            hash_matches: recomputed_hash.as_deref() == Some(order.snapshot.content_hash.as_str()),
            recomputed_hash,
            content_hash: order.snapshot.content_hash.clone(),
            captured_at: order.snapshot.captured_at,
            product: order.snapshot.product.clone(),
        };

        let events = self.ctx.ledger.events(order_id)?;
        let chain = self.ctx.ledger.verify(order_id)?;
        let downloads = summarize_downloads(&events);
        let timeline = events.into_iter().map(|e| self.timeline_entry(e)).collect();

        let tokens = self
            .ctx
            .delivery_store
            .tokens_for_order(order_id)?
            .into_iter()
            .map(|t| TokenRecord {
                token_hash_prefix: hash_prefix(&t.token_hash).to_string(),
                stage_id: t.stage_id,
                reason: t.reason,
                issued_at: t.issued_at,
                expires_at: t.expires_at,
                used_at: t.used_at,
            })
            .collect();

        let ip = if include_pii {
            order
                .buyer
                .ip_encrypted
                .as_deref()
                .and_then(|enc| self.ctx.cipher.decrypt_str(enc).ok())
        } else {
            None
        };

        let reseals = self
            .ctx
            .ledger
            .reseals(order_id)?
            .into_iter()
            .map(|r| ResealSummary {
                id: r.id,
                resealed_by: r.resealed_by,
                resealed_at: r.resealed_at,
                archived_terminal_hash: r.archived_terminal_hash,
                archive_digest: r.archive_digest,
                archived_rows: r.rows.len(),
            })
            .collect();

        let summary = OrderSummary {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status(),
            buyer_email: order.buyer.email.clone(),
            buyer_name: order.buyer.name.clone(),
            ip_masked: order.buyer.ip_masked.clone(),
            ip,
            user_agent: order.buyer.user_agent.clone(),
            amount_minor: order.amount.amount_minor,
            currency: order.amount.currency.clone(),
            payment_method: order.payment.method.clone(),
            provider_order_id: order.payment.provider_order_id.clone(),
            capture_id: order.payment.capture_id.clone(),
            license_key: order.license_key.clone(),
            download_count: order.download_count,
            download_limit: order.download_limit,
            download_expires_at: order.download_expires_at,
            downloads_revoked: order.downloads_revoked,
            freeze: order.freeze.clone(),
            retention_expires_at: order.retention_expires_at,
            created_at: order.created_at,
        };

        let report = EvidenceReport {
            generated_at: self.ctx.clock.now(),
            store: self.ctx.settings_provider.store_identity(),
            order: summary,
            snapshot,
            terms: order.terms.clone(),
            chain,
            timeline,
            tokens,
            downloads,
            stages: self.ctx.delivery_store.stages_for_order(order_id)?,
            notifications: self
                .ctx
                .notifications
                .notifications_for_order(order_id)?
                .into_iter()
                .map(NotificationSummary::from)
                .collect(),
            attachments: self.ctx.attachments.attachments_for_order(order_id)?,
            reseals,
        };
        debug!(
            order_id = %order_id,
            events = report.timeline.len(),
            chain_valid = report.chain.valid,
            "evidence report compiled"
        );
        Ok(report)
    }

    fn timeline_entry(&self, event: LedgerEvent) -> TimelineEntry {
        let location = event
            .ip_encrypted
            .as_deref()
            .and_then(|enc| self.ctx.cipher.decrypt_str(enc).ok())
            .and_then(|ip| self.ctx.geo.locate(&ip));
        TimelineEntry {
            sequence: event.sequence,
            event_type: event.event_type,
            created_at: event.created_at,
            payload: event.payload,
            ip_masked: event.ip_masked,
            location,
            user_agent: event.user_agent,
            external_ref: event.external_ref,
            event_hash: event.event_hash,
        }
    }
}

fn summarize_downloads(events: &[LedgerEvent]) -> DownloadSummary {
    let mut summary = DownloadSummary::default();
    for event in events {
        match event.event_type.as_str() {
            "download.completed" => {
                summary.completed += 1;
                summary.first_download_at.get_or_insert(event.created_at);
                summary.last_download_at = Some(event.created_at);
            }
            "download.resumed" => summary.resumed += 1,
            "download.denied" => {
                summary.denied += 1;
                let reason = event
                    .payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                *summary.denial_reasons.entry(reason).or_insert(0) += 1;
            }
            _ => {}
        }
    }
    summary
}
