//! The download fulfillment gateway.
//!
//! Turns a raw token plus an optional `Range` header into either a file
//! stream or a specific, stable rejection. The checks run in a fixed order
//! and the first failure wins:
//!
//!   signature → token row → frozen → revoked → window → used → limit → stage
//!
//! Every request runs the whole sequence. Full requests then consume the
//! token and bump the counters in one atomic store operation before any
//! byte is streamed. Range requests are resumes against a token that is
//! still unused: they never consume it and never change a counter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use evidentia_contracts::{
    order::FileRef,
    token::{hash_prefix, DownloadToken},
    DeliveryStage, EventContext, EventKind, EvidentiaError, EvidentiaResult, Order, OrderId,
    OrderStatus, StageId, StageStatus,
};
use evidentia_crypto::{hash_token, TokenRejection};

use crate::{
    context::CoreContext,
    range::{resolve_range, ByteRange, RangeRequest},
    traits::FileChunks,
};

/// Why a download was refused. The string forms are part of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    InvalidLink,
    NotFound,
    Frozen,
    Revoked,
    Expired,
    AlreadyUsed,
    LimitReached,
    StageUnavailable,
    NotReleased,
    RangeNotSatisfiable,
    FileUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidLink => "invalid_link",
            Self::NotFound => "not_found",
            Self::Frozen => "frozen",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::AlreadyUsed => "already_used",
            Self::LimitReached => "limit_reached",
            Self::StageUnavailable => "stage_unavailable",
            Self::NotReleased => "not_released",
            Self::RangeNotSatisfiable => "range_not_satisfiable",
            Self::FileUnavailable => "file_unavailable",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidLink | Self::Frozen | Self::Revoked | Self::NotReleased => 403,
            Self::NotFound | Self::StageUnavailable | Self::FileUnavailable => 404,
            Self::Expired | Self::AlreadyUsed => 410,
            Self::LimitReached => 429,
            Self::RangeNotSatisfiable => 416,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    /// File size, set for `RangeNotSatisfiable` so the caller can answer
    /// with `Content-Range: bytes */size`.
    pub total_size: Option<u64>,
}

/// An approved download, ready to stream.
pub struct GrantedDownload {
    pub order_id: OrderId,
    pub stage_id: Option<StageId>,
    pub filename: String,
    pub content_type: String,
    pub total_size: u64,
    /// `Some` for a 206 response.
    pub range: Option<ByteRange>,
    pub content_length: u64,
    pub body: FileChunks,
}

impl fmt::Debug for GrantedDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantedDownload")
            .field("order_id", &self.order_id)
            .field("stage_id", &self.stage_id)
            .field("filename", &self.filename)
            .field("total_size", &self.total_size)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Fulfillment {
    Granted(GrantedDownload),
    Denied(Denial),
}

impl Fulfillment {
    pub fn denied_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Denied(denial) => Some(denial.reason),
            Self::Granted(_) => None,
        }
    }
}

/// Validates download tokens and opens file streams.
#[derive(Clone)]
pub struct DownloadGateway {
    ctx: CoreContext,
}

impl DownloadGateway {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Run the check sequence for one download request.
    ///
    /// Denials are returned as `Ok(Fulfillment::Denied)`; `Err` means a
    /// store or file-store failure.
    pub fn fulfill(
        &self,
        raw_token: &str,
        range_header: Option<&str>,
        client: &EventContext,
    ) -> EvidentiaResult<Fulfillment> {
        let now = self.ctx.clock.now();
        let token_hash = hash_token(raw_token);
        let prefix = hash_prefix(&token_hash).to_string();

        // ── Step 1: Cryptographic validity ───────────────────────────────────
        let payload = match self.ctx.signer.verify(raw_token, now) {
            Ok(payload) => payload,
            Err(TokenRejection::Expired(payload)) => {
                let order_id = OrderId(payload.order_id);
                return self.deny(Some(&order_id), &prefix, DenyReason::InvalidLink, client);
            }
            Err(rejection) => {
                // No trustworthy order id: tracing only, never the ledger.
                warn!(
                    token_hash_prefix = %prefix,
                    rejection = ?rejection,
                    "download denied: invalid link"
                );
                return Ok(denied(DenyReason::InvalidLink));
            }
        };
        let claimed_order = OrderId(payload.order_id);

        // ── Step 2: Token row ────────────────────────────────────────────────
        let Some(token) = self.ctx.delivery_store.token(&token_hash)? else {
            return self.deny(Some(&claimed_order), &prefix, DenyReason::NotFound, client);
        };
        if token.order_id != claimed_order
            || token.stage_id.map(|s| s.0) != payload.stage_id
            || token.is_expired(now)
        {
            return self.deny(Some(&token.order_id), &prefix, DenyReason::InvalidLink, client);
        }
        let Some(order) = self.ctx.delivery_store.order(&token.order_id)? else {
            return self.deny(None, &prefix, DenyReason::NotFound, client);
        };

        // ── Steps 3 to 8: Order, token and stage state ──────────────────────────
        let stage = match token.stage_id {
            Some(stage_id) => self.ctx.delivery_store.stage(&stage_id)?,
            None => None,
        };
        if let Some(reason) = check_access(&order, &token, stage.as_ref(), now) {
            return self.deny(Some(&order.id), &prefix, reason, client);
        }

        // ── Step 9: Resolve and inspect the file ─────────────────────────────
        let Some(file) = resolve_file(&order, stage.as_ref()) else {
            return self.deny(Some(&order.id), &prefix, DenyReason::FileUnavailable, client);
        };
        let Some(meta) = self.ctx.files.head(&file.key)? else {
            error!(order_id = %order.id, file_key = %file.key, "file missing from file store");
            return self.deny(Some(&order.id), &prefix, DenyReason::FileUnavailable, client);
        };
        let total_size = meta.size;
        let content_type = meta
            .content_type
            .or_else(|| file.content_type.clone())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let range = match resolve_range(range_header, total_size) {
            RangeRequest::Full => None,
            RangeRequest::Partial(range) => Some(range),
            RangeRequest::Unsatisfiable => {
                self.record_denial(&order.id, &prefix, DenyReason::RangeNotSatisfiable, client);
                return Ok(Fulfillment::Denied(Denial {
                    reason: DenyReason::RangeNotSatisfiable,
                    total_size: Some(total_size),
                }));
            }
        };

        // ── Step 10: Open the stream ─────────────────────────────────────────
        let body = self.ctx.files.stream(&file.key, range)?;

        // ── Step 11: Consume (full requests only) and record ─────────────────
        match range {
            Some(range) => {
                let event = EventKind::DownloadResumed {
                    token_hash_prefix: prefix.clone(),
                    stage_id: token.stage_id,
                    file_key: file.key.clone(),
                    range_start: range.start,
                    range_end: range.end,
                };
                self.record(&order.id, &event, client);
                debug!(
                    order_id = %order.id,
                    token_hash_prefix = %prefix,
                    range_start = range.start,
                    range_end = range.end,
                    "download resumed"
                );
            }
            None => {
                let mut refused = None;
                let consumed = self.ctx.delivery_store.modify_download(&token_hash, &mut |records| {
                    if let Some(reason) =
                        check_access(&records.order, &records.token, records.stage.as_ref(), now)
                    {
                        refused = Some(reason);
                        return Err(EvidentiaError::validation(reason.as_str()));
                    }
                    records.token.used_at = Some(now);
                    records.order.download_count += 1;
                    records.order.updated_at = now;
                    if let Some(stage) = records.stage.as_mut() {
                        stage.download_count += 1;
                        if stage.status == StageStatus::Ready {
                            stage.status = StageStatus::Delivered;
                        }
                    }
                    Ok(())
                });
                let records = match (consumed, refused) {
                    (Ok(records), _) => records,
                    (Err(_), Some(reason)) => {
                        return self.deny(Some(&order.id), &prefix, reason, client);
                    }
                    (Err(e), None) => return Err(e),
                };

                let event = EventKind::DownloadCompleted {
                    token_hash_prefix: prefix.clone(),
                    stage_id: token.stage_id,
                    file_key: file.key.clone(),
                    file_sha256: file.sha256.clone(),
                    bytes: total_size,
                    download_count: records.order.download_count,
                };
                self.record(&order.id, &event, client);
                info!(
                    order_id = %order.id,
                    token_hash_prefix = %prefix,
                    download_count = records.order.download_count,
                    download_limit = records.order.download_limit,
                    "download granted"
                );
            }
        }

        Ok(Fulfillment::Granted(GrantedDownload {
            order_id: order.id,
            stage_id: token.stage_id,
            filename: file.filename.clone(),
            content_type,
            total_size,
            range,
            content_length: range.map_or(total_size, |r| r.len()),
            body,
        }))
    }

    fn deny(
        &self,
        order_id: Option<&OrderId>,
        prefix: &str,
        reason: DenyReason,
        client: &EventContext,
    ) -> EvidentiaResult<Fulfillment> {
        match order_id {
            Some(order_id) => self.record_denial(order_id, prefix, reason, client),
            None => warn!(token_hash_prefix = %prefix, reason = %reason, "download denied"),
        }
        Ok(denied(reason))
    }

    /// Record a denial against an existing order.
    fn record_denial(&self, order_id: &OrderId, prefix: &str, reason: DenyReason, client: &EventContext) {
        warn!(
            order_id = %order_id,
            token_hash_prefix = %prefix,
            reason = %reason,
            "download denied"
        );
        match self.ctx.delivery_store.order(order_id) {
            Ok(Some(_)) => {
                let event = EventKind::DownloadDenied {
                    token_hash_prefix: prefix.to_string(),
                    reason: reason.as_str().to_string(),
                };
                self.record(order_id, &event, client);
            }
            Ok(None) => {}
            Err(e) => error!(order_id = %order_id, error = %e, "order lookup failed while recording denial"),
        }
    }

    /// Append to the ledger without failing the request.
    ///
    /// A ledger outage must not turn a granted download into an error after
    /// the token has been consumed.
    fn record(&self, order_id: &OrderId, event: &EventKind, client: &EventContext) {
        if let Err(e) = self.ctx.ledger.append(order_id, event, client) {
            error!(order_id = %order_id, error = %e, "failed to record download outcome");
        }
    }
}

fn denied(reason: DenyReason) -> Fulfillment {
    Fulfillment::Denied(Denial {
        reason,
        total_size: None,
    })
}

/// Checks 3 to 8 against the current rows. `None` means allowed.
fn check_access(
    order: &Order,
    token: &DownloadToken,
    stage: Option<&DeliveryStage>,
    now: DateTime<Utc>,
) -> Option<DenyReason> {
    if order.is_frozen() {
        return Some(DenyReason::Frozen);
    }
    if order.downloads_revoked || order.status == OrderStatus::Revoked {
        return Some(DenyReason::Revoked);
    }
    if order.window_elapsed(now) {
        return Some(DenyReason::Expired);
    }
    if token.is_consumed() {
        return Some(DenyReason::AlreadyUsed);
    }
    if order.download_count >= order.download_limit {
        return Some(DenyReason::LimitReached);
    }
    if token.stage_id.is_some() {
        let Some(stage) = stage else {
            return Some(DenyReason::StageUnavailable);
        };
        match stage.status {
            StageStatus::Revoked => return Some(DenyReason::StageUnavailable),
            StageStatus::Pending => return Some(DenyReason::NotReleased),
            StageStatus::Ready | StageStatus::Delivered => {}
        }
        if stage.download_count >= stage.download_limit {
            return Some(DenyReason::LimitReached);
        }
    }
    None
}

/// Stage file, then the order's delivery package, then the snapshot's
/// first file.
fn resolve_file(order: &Order, stage: Option<&DeliveryStage>) -> Option<FileRef> {
    if let Some(stage) = stage {
        return Some(stage.file.clone());
    }
    order
        .delivery_package
        .clone()
        .or_else(|| order.snapshot.product.files.first().cloned())
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use chrono::Duration;

    use super::*;
    use crate::{
        context::DeliverySettings,
        test_support::{body_bytes, guide_bytes, raw_token, staged_product, Harness, GUIDE_KEY},
        traits::FileStore,
    };

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn settings(download_limit: u32) -> DeliverySettings {
        DeliverySettings {
            download_limit,
            ..DeliverySettings::default()
        }
    }

    fn expect_denied(fulfillment: Fulfillment, reason: DenyReason) {
        match fulfillment {
            Fulfillment::Denied(denial) => assert_eq!(denial.reason, reason),
            other => panic!("expected {reason}, got {:?}", other),
        }
    }

    fn denial_reasons(h: &Harness, order_id: &OrderId) -> Vec<String> {
        h.machine
            .context()
            .ledger
            .events(order_id)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "download.denied")
            .map(|e| e.payload["reason"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    // ── Full downloads ───────────────────────────────────────────────────────

    #[test]
    fn full_download_streams_the_file_and_consumes_the_token() {
        let h = Harness::new();
        let (order, link) = h.paid_order();
        let raw = raw_token(&link.download_url);

        let bytes = body_bytes(h.download(raw, None));
        assert_eq!(bytes, guide_bytes());

        let order = h.machine.order(&order.id).unwrap();
        assert_eq!(order.download_count, 1);
        let token = h
            .machine
            .context()
            .delivery_store
            .token(&hash_token(raw))
            .unwrap()
            .unwrap();
        assert!(token.is_consumed());
        assert!(h.event_types(&order).contains(&"download.completed".to_string()));

        expect_denied(h.download(raw, None), DenyReason::AlreadyUsed);
    }

    #[test]
    fn limit_of_three_allows_three_full_downloads() {
        let h = Harness::with_settings(settings(3));
        let (order, link) = h.paid_order();

        body_bytes(h.download(raw_token(&link.download_url), None));
        for _ in 0..2 {
            let raw = h.reissue(&order);
            body_bytes(h.download(&raw, None));
        }
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 3);

        let fourth = h.reissue(&order);
        expect_denied(h.download(&fourth, None), DenyReason::LimitReached);
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 3);
        assert_eq!(denial_reasons(&h, &order.id), vec!["limit_reached"]);
    }

    #[test]
    fn concurrent_downloads_at_limit_minus_one_grant_exactly_one() {
        let h = Harness::with_settings(settings(2));
        let (order, link) = h.paid_order();
        body_bytes(h.download(raw_token(&link.download_url), None));

        let tokens = [h.reissue(&order), h.reissue(&order)];
        let barrier = Barrier::new(2);
        let outcomes: Vec<Option<DenyReason>> = std::thread::scope(|scope| {
            let handles: Vec<_> = tokens
                .iter()
                .map(|raw| {
                    let gateway = h.gateway.clone();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        gateway
                            .fulfill(raw, None, &EventContext::system())
                            .unwrap()
                            .denied_reason()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let granted = outcomes.iter().filter(|o| o.is_none()).count();
        assert_eq!(granted, 1, "outcomes: {outcomes:?}");
        assert!(outcomes.contains(&Some(DenyReason::LimitReached)));
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 2);
    }

    // ── Range requests ───────────────────────────────────────────────────────

    #[test]
    fn range_resume_after_two_downloads_changes_no_counter() {
        let h = Harness::with_settings(settings(3));
        let (order, link) = h.paid_order();
        body_bytes(h.download(raw_token(&link.download_url), None));
        let second = h.reissue(&order);
        body_bytes(h.download(&second, None));
        let third = h.reissue(&order);

        match h.download(&third, Some("bytes=100-")) {
            Fulfillment::Granted(granted) => {
                let total = guide_bytes().len() as u64;
                assert_eq!(granted.range, Some(ByteRange { start: 100, end: total - 1 }));
                assert_eq!(granted.content_length, total - 100);
                let body: Vec<u8> = granted.body.map(|c| c.unwrap()).flatten().collect();
                assert_eq!(body, guide_bytes()[100..].to_vec());
            }
            other => panic!("expected resumed download, got {:?}", other),
        }

        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 2);
        let token = h
            .machine
            .context()
            .delivery_store
            .token(&hash_token(&third))
            .unwrap()
            .unwrap();
        assert!(!token.is_consumed(), "a resume must leave the token unused");
        let types = h.event_types(&order);
        assert_eq!(types.iter().filter(|t| *t == "download.completed").count(), 2);
        assert_eq!(types.last().map(String::as_str), Some("download.resumed"));

        // The same token still has its one full download.
        body_bytes(h.download(&third, None));
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 3);
    }

    #[test]
    fn consumed_token_cannot_resume() {
        let h = Harness::with_settings(settings(1));
        let (order, link) = h.paid_order();
        let raw = raw_token(&link.download_url);
        body_bytes(h.download(raw, None));

        for _ in 0..3 {
            expect_denied(h.download(raw, Some("bytes=0-")), DenyReason::AlreadyUsed);
        }
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 1);
        assert_eq!(
            denial_reasons(&h, &order.id),
            vec!["already_used", "already_used", "already_used"]
        );
    }

    #[test]
    fn range_on_fresh_token_is_refused_once_the_limit_is_reached() {
        let h = Harness::with_settings(settings(1));
        let (order, link) = h.paid_order();
        body_bytes(h.download(raw_token(&link.download_url), None));

        let fresh = h.reissue(&order);
        expect_denied(h.download(&fresh, Some("bytes=0-")), DenyReason::LimitReached);
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 1);
    }

    #[test]
    fn malformed_range_header_is_a_full_consuming_request() {
        let h = Harness::new();
        let (order, link) = h.paid_order();
        let raw = raw_token(&link.download_url);

        match h.download(raw, Some("bytes=garbage")) {
            Fulfillment::Granted(granted) => assert_eq!(granted.range, None),
            other => panic!("expected full download, got {:?}", other),
        }
        assert_eq!(h.machine.order(&order.id).unwrap().download_count, 1);
        expect_denied(h.download(raw, Some("bytes=garbage")), DenyReason::AlreadyUsed);
    }

    #[test]
    fn unsatisfiable_range_reports_the_file_size() {
        let h = Harness::new();
        let (_, link) = h.paid_order();
        match h.download(raw_token(&link.download_url), Some("bytes=999999999-")) {
            Fulfillment::Denied(denial) => {
                assert_eq!(denial.reason, DenyReason::RangeNotSatisfiable);
                assert_eq!(denial.total_size, Some(guide_bytes().len() as u64));
            }
            other => panic!("expected 416 denial, got {:?}", other),
        }
    }

    // ── Rejections ───────────────────────────────────────────────────────────

    #[test]
    fn tampered_token_is_invalid_and_not_written_to_the_ledger() {
        let h = Harness::new();
        let (order, link) = h.paid_order();
        let raw = raw_token(&link.download_url);
        let before = h.event_types(&order).len();

        let mut tampered = raw.to_string();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        expect_denied(h.download(&tampered, None), DenyReason::InvalidLink);
        expect_denied(h.download("not-a-token", None), DenyReason::InvalidLink);
        assert_eq!(h.event_types(&order).len(), before);
    }

    #[test]
    fn expired_token_is_invalid_and_recorded() {
        let h = Harness::new();
        let (order, link) = h.paid_order();
        h.clock.advance(Duration::minutes(24 * 60 + 1));

        expect_denied(h.download(raw_token(&link.download_url), None), DenyReason::InvalidLink);
        assert_eq!(denial_reasons(&h, &order.id), vec!["invalid_link"]);
    }

    #[test]
    fn elapsed_download_window_is_expired() {
        let h = Harness::with_settings(DeliverySettings {
            download_window_days: 1,
            token_ttl_minutes: 3 * 24 * 60,
            ..DeliverySettings::default()
        });
        let (_, link) = h.paid_order();
        h.clock.advance(Duration::days(2));
        expect_denied(h.download(raw_token(&link.download_url), None), DenyReason::Expired);
    }

    #[test]
    fn frozen_order_blocks_downloads_until_unfrozen() {
        let h = Harness::new();
        let (order, link) = h.paid_order();
        let raw = raw_token(&link.download_url);
        let ctx = EventContext::system();

        h.machine.freeze(&order.id, "ops", "chargeback", &ctx).unwrap();
        expect_denied(h.download(raw, None), DenyReason::Frozen);
        expect_denied(h.download(raw, Some("bytes=0-10")), DenyReason::Frozen);

        h.machine.unfreeze(&order.id, "ops", &ctx).unwrap();
        body_bytes(h.download(raw, None));
    }

    #[test]
    fn revoked_downloads_are_refused() {
        let h = Harness::new();
        let (order, link) = h.paid_order();
        h.machine
            .revoke_downloads(&order.id, "ops", "abuse", &EventContext::system())
            .unwrap();
        expect_denied(h.download(raw_token(&link.download_url), None), DenyReason::Revoked);
    }

    #[test]
    fn missing_file_is_file_unavailable() {
        let h = Harness::new();
        let (_, link) = h.paid_order();
        h.backend.files.delete(GUIDE_KEY).unwrap();
        expect_denied(
            h.download(raw_token(&link.download_url), None),
            DenyReason::FileUnavailable,
        );
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    #[test]
    fn stage_token_delivers_the_stage_file() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        let grant = h
            .machine
            .record_payment_captured(&order.id, None, &EventContext::system())
            .unwrap();
        assert!(grant.link.is_none());

        let stages = h.machine.stages(&order.id).unwrap();
        let release = h
            .machine
            .release_stage(&order.id, &stages[0].id, "ops", &EventContext::system())
            .unwrap();

        let bytes = body_bytes(h.download(raw_token(&release.download_url), None));
        assert_eq!(bytes, b"chapter 1".to_vec());
        let stage = h.machine.stages(&order.id).unwrap().remove(0);
        assert_eq!(stage.status, StageStatus::Delivered);
        assert_eq!(stage.download_count, 1);
    }

    #[test]
    fn revoked_stage_is_unavailable() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        h.machine
            .record_payment_captured(&order.id, None, &EventContext::system())
            .unwrap();
        let stage = h.machine.stages(&order.id).unwrap().remove(1);
        let release = h
            .machine
            .release_stage(&order.id, &stage.id, "ops", &EventContext::system())
            .unwrap();
        h.machine
            .revoke_stage(&order.id, &stage.id, "ops", "wrong file", &EventContext::system())
            .unwrap();

        expect_denied(
            h.download(raw_token(&release.download_url), None),
            DenyReason::StageUnavailable,
        );
    }

    #[test]
    fn deny_reasons_map_to_http_statuses() {
        assert_eq!(DenyReason::InvalidLink.http_status(), 403);
        assert_eq!(DenyReason::NotFound.http_status(), 404);
        assert_eq!(DenyReason::AlreadyUsed.http_status(), 410);
        assert_eq!(DenyReason::LimitReached.http_status(), 429);
        assert_eq!(DenyReason::RangeNotSatisfiable.http_status(), 416);
        assert_eq!(DenyReason::NotReleased.to_string(), "not_released");
    }
}
