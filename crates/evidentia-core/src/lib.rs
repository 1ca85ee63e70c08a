//! # evidentia-core
//!
//! Delivery and evidence core for digital-goods sales.
//!
//! This crate provides:
//! - The store and collaborator seams (`traits`) with in-memory
//!   implementations (`memory`)
//! - `DeliveryStateMachine`, the only component that changes order, stage
//!   and freeze state, including manual sales and privileged purge
//! - `DownloadGateway`, which validates download tokens and streams files
//! - `EvidenceCompiler`, which assembles the dispute evidence report
//!
//! Every component receives an explicit `CoreContext`; there is no global
//! state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evidentia_core::{DeliveryStateMachine, DownloadGateway, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new(&keys, settings, identity, Arc::new(SystemClock));
//! let machine = DeliveryStateMachine::new(backend.context());
//! let grant = machine.record_payment_captured(&order.id, Some(capture_id), &ctx)?;
//! let gateway = DownloadGateway::new(backend.context());
//! let outcome = gateway.fulfill(raw_token, range_header, &ctx)?;
//! ```

pub mod context;
pub mod evidence;
pub mod gateway;
pub mod machine;
pub mod memory;
pub mod range;
pub mod redeem;
pub mod report;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{CoreContext, DeliverySettings, KeyMaterial};
pub use evidence::{NewAttachment, PurgeSummary};
pub use gateway::{Denial, DenyReason, DownloadGateway, Fulfillment, GrantedDownload};
pub use machine::{DeliveryStateMachine, IssuedLink, NewOrder, PaymentGrant, StageRelease};
pub use memory::{InMemoryBackend, InMemoryFileStore, InMemoryStore, ManualClock, RecordingMailer};
pub use range::{ByteRange, RangeRequest};
pub use redeem::{CreatedSale, NewManualSale, Redemption};
pub use report::{EvidenceCompiler, EvidenceReport};
pub use traits::SystemClock;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use evidentia_contracts::{
        order::Money, ConflictCode, EventContext, EvidentiaError, OrderStatus, StageStatus,
    };
    use evidentia_crypto::canonical_sha256;

    use super::*;
    use crate::{
        test_support::{client, product, raw_token, staged_product, Harness},
        traits::{Clock, GeoLocation},
    };

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn expect_conflict<T: std::fmt::Debug>(result: Result<T, EvidentiaError>, code: ConflictCode) {
        match result {
            Err(EvidentiaError::StateConflict { code: got, .. }) => assert_eq!(got, code),
            other => panic!("expected {code} conflict, got {:?}", other),
        }
    }

    fn system() -> EventContext {
        EventContext::system()
    }

    // ── Order creation and payment ───────────────────────────────────────────

    #[test]
    fn created_order_captures_snapshot_and_masks_ip() {
        let h = Harness::new();
        let order = h.pending_order(product());

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.buyer.email, "buyer@example.com");
        assert_eq!(order.buyer.ip_masked.as_deref(), Some("203.0.113.x"));
        assert_ne!(order.buyer.ip_encrypted.as_deref(), Some("203.0.113.42"));
        assert_eq!(
            order.snapshot.content_hash,
            canonical_sha256(&order.snapshot.product).unwrap()
        );
        assert!(order.order_number.starts_with("EV-20260301-"));
        assert_eq!(h.event_types(&order), vec!["order.created"]);
    }

    #[test]
    fn negative_price_is_rejected() {
        let h = Harness::new();
        let mut bad = product();
        bad.price = Money {
            amount_minor: -1,
            currency: "USD".to_string(),
        };
        let result = h.machine.create_order(
            NewOrder {
                product: bad,
                buyer_email: "a@b.co".to_string(),
                buyer_name: None,
                provider_order_id: None,
            },
            &client(),
        );
        match result {
            Err(EvidentiaError::Validation { .. }) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn captured_payment_assigns_license_and_mails_link() {
        let h = Harness::new();
        let (order, link) = h.paid_order();

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment.capture_id.as_deref(), Some("CAP-1"));
        assert_eq!(order.license_key.as_ref().map(String::len), Some(19));
        assert!(order.download_expires_at.is_some());
        assert_eq!(link.token_hash_prefix.len(), 12);
        assert_eq!(
            h.event_types(&order),
            vec![
                "order.created",
                "payment.captured",
                "license.created",
                "token.issued",
                "email.sent"
            ]
        );

        let sent = h.backend.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, "download_ready");
        assert_eq!(sent[0].recipient, "buyer@example.com");
        assert_eq!(sent[0].data["download_url"], link.download_url);
    }

    #[test]
    fn mail_outage_is_recorded_and_never_fatal() {
        let h = Harness::new();
        h.backend.mailer.fail_next(3);
        let (order, _) = h.paid_order();

        assert_eq!(order.status, OrderStatus::Paid);
        let events = h.machine.context().ledger.events(&order.id).unwrap();
        let failed = events.last().unwrap();
        assert_eq!(failed.event_type, "email.failed");
        assert_eq!(failed.payload["attempts"], 3);
    }

    #[test]
    fn transitions_outside_the_table_conflict() {
        let h = Harness::new();
        let order = h.pending_order(product());
        expect_conflict(
            h.machine.confirm_payment(&order.id, "EV-1", None, &system()),
            ConflictCode::InvalidTransition,
        );
        expect_conflict(
            h.machine.refund(&order.id, "EV-2", &system()),
            ConflictCode::InvalidTransition,
        );
    }

    #[test]
    fn refund_revokes_downloads() {
        let h = Harness::new();
        let (order, _) = h.paid_order();
        let refunded = h.machine.refund(&order.id, "EV-9", &system()).unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert!(refunded.downloads_revoked);
        expect_conflict(
            h.machine.issue_download_link(&order.id, None, "ops", &system()),
            ConflictCode::DownloadsRevoked,
        );
    }

    // ── Freeze overlay ───────────────────────────────────────────────────────

    #[test]
    fn freeze_records_previous_status_and_retention() {
        let h = Harness::new();
        let (order, _) = h.paid_order();
        let frozen = h.machine.freeze(&order.id, "ops", "chargeback", &system()).unwrap();

        assert_eq!(frozen.status, OrderStatus::Frozen);
        let record = frozen.freeze.as_ref().unwrap();
        assert_eq!(record.status_before, OrderStatus::Paid);
        assert_eq!(record.frozen_by, "ops");
        assert_eq!(
            frozen.retention_expires_at,
            Some(h.clock.now() + Duration::days(180))
        );

        expect_conflict(
            h.machine.freeze(&order.id, "ops", "again", &system()),
            ConflictCode::Frozen,
        );
        expect_conflict(
            h.machine.issue_download_link(&order.id, None, "ops", &system()),
            ConflictCode::Frozen,
        );
    }

    #[test]
    fn payment_transition_while_frozen_updates_restored_status() {
        let h = Harness::new();
        let (order, _) = h.paid_order();
        h.machine.freeze(&order.id, "ops", "dispute", &system()).unwrap();

        let refunded = h.machine.refund(&order.id, "EV-3", &system()).unwrap();
        assert_eq!(refunded.status, OrderStatus::Frozen);
        assert_eq!(
            refunded.freeze.as_ref().map(|r| r.status_before),
            Some(OrderStatus::Refunded)
        );

        let restored = h.machine.unfreeze(&order.id, "ops", &system()).unwrap();
        assert_eq!(restored.status, OrderStatus::Refunded);
        assert!(restored.freeze.is_none());
        expect_conflict(
            h.machine.unfreeze(&order.id, "ops", &system()),
            ConflictCode::NotFrozen,
        );
    }

    #[test]
    fn capture_while_frozen_issues_no_link() {
        let h = Harness::new();
        let order = h.pending_order(product());
        h.machine.freeze(&order.id, "ops", "fraud review", &system()).unwrap();

        let grant = h
            .machine
            .record_payment_captured(&order.id, Some("CAP-9".to_string()), &system())
            .unwrap();
        assert!(grant.link.is_none(), "a frozen order must not receive a link");
        assert_eq!(grant.order.status, OrderStatus::Frozen);
        assert!(!h.event_types(&order).contains(&"token.issued".to_string()));
        assert!(h
            .backend
            .mailer
            .sent()
            .iter()
            .all(|m| m.template != "download_ready"));
        assert!(h
            .machine
            .context()
            .delivery_store
            .tokens_for_order(&order.id)
            .unwrap()
            .is_empty());

        let restored = h.machine.unfreeze(&order.id, "ops", &system()).unwrap();
        assert_eq!(restored.status, OrderStatus::Paid);
        h.reissue(&order);
        assert!(h.event_types(&order).contains(&"token.issued".to_string()));
    }

    #[test]
    fn freeze_landing_before_the_mint_keeps_the_token_out() {
        let h = Harness::new();
        let (order, _) = h.paid_order();
        // Stale copy read before the freeze committed.
        let stale = h.machine.order(&order.id).unwrap();
        h.machine.freeze(&order.id, "ops", "dispute", &system()).unwrap();
        let before = h
            .machine
            .context()
            .delivery_store
            .tokens_for_order(&order.id)
            .unwrap()
            .len();

        expect_conflict(
            h.machine.mint_link(&stale, None, "reissue", &system()),
            ConflictCode::Frozen,
        );
        let after = h
            .machine
            .context()
            .delivery_store
            .tokens_for_order(&order.id)
            .unwrap()
            .len();
        assert_eq!(after, before);
    }

    #[test]
    fn revoked_stage_cannot_receive_a_minted_link() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        h.machine
            .record_payment_captured(&order.id, None, &system())
            .unwrap();
        let stage = h.machine.stages(&order.id).unwrap().remove(0);
        h.machine
            .release_stage(&order.id, &stage.id, "ops", &system())
            .unwrap();
        let released = h.machine.stages(&order.id).unwrap().remove(0);
        h.machine
            .revoke_stage(&order.id, &stage.id, "ops", "wrong file", &system())
            .unwrap();

        let order = h.machine.order(&order.id).unwrap();
        expect_conflict(
            h.machine.mint_link(&order, Some(&released), "reissue", &system()),
            ConflictCode::StageRevoked,
        );
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    #[test]
    fn staged_capture_mails_confirmation_without_a_link() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        let grant = h
            .machine
            .record_payment_captured(&order.id, None, &system())
            .unwrap();

        assert!(grant.link.is_none());
        assert_eq!(h.backend.mailer.sent()[0].template, "order_confirmed");
        let stages = h.machine.stages(&order.id).unwrap();
        assert_eq!(stages.len(), 3);
        assert!(stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(
            stages.iter().map(|s| s.stage_order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn stage_release_requires_payment() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        let stage = h.machine.stages(&order.id).unwrap().remove(0);
        expect_conflict(
            h.machine.release_stage(&order.id, &stage.id, "ops", &system()),
            ConflictCode::NotPaid,
        );
        assert_eq!(
            h.machine.stages(&order.id).unwrap()[0].status,
            StageStatus::Pending
        );
    }

    #[test]
    fn stage_release_is_once_only_and_blocked_while_frozen() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        h.machine
            .record_payment_captured(&order.id, None, &system())
            .unwrap();
        let stages = h.machine.stages(&order.id).unwrap();

        let release = h
            .machine
            .release_stage(&order.id, &stages[0].id, "ops", &system())
            .unwrap();
        assert!(release.success);
        assert_eq!(release.stage.status, StageStatus::Ready);
        assert_eq!(release.stage.released_by.as_deref(), Some("ops"));
        expect_conflict(
            h.machine.release_stage(&order.id, &stages[0].id, "ops", &system()),
            ConflictCode::AlreadyReleased,
        );

        h.machine.freeze(&order.id, "ops", "dispute", &system()).unwrap();
        expect_conflict(
            h.machine.release_stage(&order.id, &stages[1].id, "ops", &system()),
            ConflictCode::Frozen,
        );
    }

    #[test]
    fn stage_links_require_a_released_stage() {
        let h = Harness::new();
        let order = h.pending_order(staged_product());
        h.machine
            .record_payment_captured(&order.id, None, &system())
            .unwrap();
        let stage = h.machine.stages(&order.id).unwrap().remove(2);

        expect_conflict(
            h.machine
                .issue_download_link(&order.id, Some(&stage.id), "ops", &system()),
            ConflictCode::NotReleased,
        );
        match h.machine.issue_download_link(&order.id, None, "ops", &system()) {
            Err(EvidentiaError::Validation { .. }) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    // ── Manual sales ─────────────────────────────────────────────────────────

    fn manual_sale(h: &Harness) -> CreatedSale {
        h.machine
            .create_manual_sale(
                NewManualSale {
                    product: product(),
                    buyer_email: "Wire@Buyer.test".to_string(),
                    amount: Some(Money {
                        amount_minor: 2500,
                        currency: "USD".to_string(),
                    }),
                    download_limit: Some(2),
                },
                "ops",
            )
            .unwrap()
    }

    #[test]
    fn redeem_creates_a_paid_order_with_terms() {
        let h = Harness::new();
        let sale = manual_sale(&h);
        assert!(sale.redeem_url.ends_with(&sale.redeem_token));

        let redemption = h
            .machine
            .redeem(&sale.redeem_token, true, Some("Wire Buyer".to_string()), &client())
            .unwrap();
        assert_eq!(redemption.download_limit, 2);
        assert!(redemption.download_url.is_some());

        let order = h.machine.order(&redemption.order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment.method, "manual");
        assert_eq!(order.amount.amount_minor, 2500);
        assert_eq!(order.buyer.email, "wire@buyer.test");
        assert_eq!(order.terms.as_ref().map(|t| t.version.as_str()), Some("1"));
        assert_eq!(order.license_key.as_deref(), Some(redemption.license_key.as_str()));

        let types = h.event_types(&order);
        assert_eq!(types[0], "order.created");
        assert_eq!(types[1], "terms.accepted");
        assert!(types.contains(&"redeem.confirmed".to_string()));
    }

    #[test]
    fn redeem_link_is_single_use() {
        let h = Harness::new();
        let sale = manual_sale(&h);
        h.machine
            .redeem(&sale.redeem_token, true, None, &client())
            .unwrap();
        expect_conflict(
            h.machine.redeem(&sale.redeem_token, true, None, &client()),
            ConflictCode::AlreadyRedeemed,
        );
    }

    #[test]
    fn redeem_refuses_expired_links_and_missing_consent() {
        let h = Harness::new();
        let sale = manual_sale(&h);
        match h.machine.redeem(&sale.redeem_token, false, None, &client()) {
            Err(EvidentiaError::Validation { .. }) => {}
            other => panic!("expected validation error, got {:?}", other),
        }

        h.clock.advance(Duration::hours(73));
        expect_conflict(
            h.machine.redeem(&sale.redeem_token, true, None, &client()),
            ConflictCode::LinkExpired,
        );
        match h.machine.redeem("unknown-token", true, None, &client()) {
            Err(EvidentiaError::NotFound { .. }) => {}
            other => panic!("expected not found, got {:?}", other),
        }
    }

    // ── Evidence and purge ───────────────────────────────────────────────────

    #[test]
    fn purge_is_refused_during_retention_then_cascades() {
        let h = Harness::new();
        let (order, _) = h.paid_order();
        let attachment = h
            .machine
            .attach_evidence(
                &order.id,
                NewAttachment {
                    filename: "../../receipts/delivery-proof.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    content: b"%PDF-1.7 proof".to_vec(),
                    note: Some("courier receipt".to_string()),
                },
                "ops",
                &system(),
            )
            .unwrap();
        assert_eq!(attachment.filename, "delivery-proof.pdf");
        assert!(h.backend.files.contains(&attachment.file_key));

        h.machine.freeze(&order.id, "ops", "dispute", &system()).unwrap();
        expect_conflict(h.machine.purge(&order.id, "ops"), ConflictCode::RetentionActive);

        h.clock.advance(Duration::days(181));
        let summary = h.machine.purge(&order.id, "ops").unwrap();
        assert_eq!(summary.attachments, 1);
        assert!(summary.tokens >= 1);
        assert!(summary.events >= 6);

        assert!(!h.backend.files.contains(&attachment.file_key));
        match h.machine.order(&order.id) {
            Err(EvidentiaError::NotFound { .. }) => {}
            other => panic!("expected purged order, got {:?}", other),
        }
        assert!(h.machine.context().ledger.events(&order.id).unwrap().is_empty());
    }

    // ── Evidence report ──────────────────────────────────────────────────────

    #[test]
    fn report_covers_timeline_downloads_and_integrity() {
        let h = Harness::new();
        h.backend.geo.insert(
            "203.0.113.42",
            GeoLocation {
                country: Some("NL".to_string()),
                city: Some("Utrecht".to_string()),
            },
        );
        let (order, link) = h.paid_order();
        h.download(raw_token(&link.download_url), None);
        h.download(raw_token(&link.download_url), None);

        let compiler = EvidenceCompiler::new(h.machine.context().clone());
        let report = compiler.compile(&order.id, false).unwrap();

        assert!(report.chain.valid);
        assert!(report.snapshot.hash_matches);
        assert_eq!(report.store.name, "Test Store");
        assert_eq!(report.order.ip, None);
        assert_eq!(report.order.ip_masked.as_deref(), Some("203.0.113.x"));
        assert_eq!(report.downloads.completed, 1);
        assert_eq!(report.downloads.denied, 1);
        assert_eq!(report.downloads.denial_reasons.get("already_used"), Some(&1));
        assert_eq!(report.tokens.len(), 1);
        assert!(report.tokens[0].used_at.is_some());
        assert_eq!(
            report.timeline[0].location.as_ref().and_then(|l| l.city.as_deref()),
            Some("Utrecht")
        );

        let with_pii = compiler.compile(&order.id, true).unwrap();
        assert_eq!(with_pii.order.ip.as_deref(), Some("203.0.113.42"));
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["order"].get("ip").is_none());
    }

    #[test]
    fn report_flags_a_tampered_chain() {
        let h = Harness::new();
        let (order, _) = h.paid_order();
        h.backend
            .ledger_store
            .tamper(&order.id, 2, |event| {
                event.payload["amount_minor"] = serde_json::json!(1);
            })
            .unwrap();

        let report = EvidenceCompiler::new(h.machine.context().clone())
            .compile(&order.id, false)
            .unwrap();
        assert!(!report.chain.valid);
        assert_eq!(report.chain.broken_at_sequence, Some(2));
    }
}
