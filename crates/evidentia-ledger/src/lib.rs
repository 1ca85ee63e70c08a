//! # evidentia-ledger
//!
//! Append-only, SHA-256 hash-chained event ledger, one chain per order.
//!
//! ## Overview
//!
//! Every event links to its predecessor through `prev_hash`. Changing any
//! hashed field of any stored event, even a single byte, breaks the chain
//! and `verify` reports the first broken sequence with the expected and
//! actual hashes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use evidentia_ledger::{EventLedger, InMemoryLedgerStore};
//!
//! let ledger = EventLedger::new(Arc::new(InMemoryLedgerStore::new()), cipher);
//! ledger.append(&order_id, &EventKind::LicenseCreated { license_key }, &EventContext::system())?;
//! assert!(ledger.verify(&order_id)?.valid);
//! ```

pub mod chain;
pub mod ledger;
pub mod memory;
pub mod store;

pub use chain::{hash_event, verify_events};
pub use ledger::{EventLedger, DEFAULT_MAX_APPEND_ATTEMPTS};
pub use memory::InMemoryLedgerStore;
pub use store::{ChainTail, LedgerStore};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{Arc, Barrier},
        thread,
    };

    use serde_json::json;

    use evidentia_contracts::{
        event::ChainBreak, EventContext, EventKind, EvidentiaError, OrderId, GENESIS_HASH,
    };
    use evidentia_crypto::PiiCipher;

    use super::{EventLedger, InMemoryLedgerStore};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn ledger() -> (EventLedger, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        let ledger = EventLedger::new(Arc::new(store.clone()), PiiCipher::new([3u8; 32]));
        (ledger, store)
    }

    fn license(n: u32) -> EventKind {
        EventKind::LicenseCreated {
            license_key: format!("KEY-{n}"),
        }
    }

    /// The four-event checkout prefix used in several tests.
    fn seed_checkout(ledger: &EventLedger, order: &OrderId) {
        let ctx = EventContext::system();
        let events = [
            EventKind::OrderCreated {
                order_number: "EV-20260101-ABC123".to_string(),
                product_id: "prod-1".to_string(),
                buyer_email: "buyer@example.com".to_string(),
                amount_minor: 4900,
                currency: "USD".to_string(),
                snapshot_hash: "ab".repeat(32),
                source: "checkout".to_string(),
            },
            EventKind::TermsAccepted {
                version: "2026-01".to_string(),
                terms_hash: "cd".repeat(32),
            },
            EventKind::PaymentCaptured {
                method: "provider".to_string(),
                capture_id: Some("CAP-1".to_string()),
                amount_minor: 4900,
                currency: "USD".to_string(),
            },
            EventKind::LicenseCreated {
                license_key: "ABCD-EFGH-JKLM-NPQR".to_string(),
            },
        ];
        for kind in &events {
            ledger.append(order, kind, &ctx).unwrap();
        }
    }

    // ── Append ────────────────────────────────────────────────────────────────

    #[test]
    fn first_event_links_to_genesis() {
        let (ledger, _) = ledger();
        let order = OrderId::new();
        let event = ledger.append(&order, &license(1), &EventContext::system()).unwrap();

        assert_eq!(event.sequence, 1);
        assert_eq!(event.prev_hash, GENESIS_HASH);
        assert_eq!(event.event_hash.len(), 64);
    }

    #[test]
    fn sequences_are_contiguous_and_linked() {
        let (ledger, _) = ledger();
        let order = OrderId::new();
        for n in 0..5 {
            ledger.append(&order, &license(n), &EventContext::system()).unwrap();
        }

        let events = ledger.events(&order).unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        for pair in events.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].event_hash);
        }
    }

    #[test]
    fn orders_have_independent_chains() {
        let (ledger, _) = ledger();
        let a = OrderId::new();
        let b = OrderId::new();
        ledger.append(&a, &license(1), &EventContext::system()).unwrap();
        ledger.append(&a, &license(2), &EventContext::system()).unwrap();
        let first_b = ledger.append(&b, &license(3), &EventContext::system()).unwrap();

        assert_eq!(first_b.sequence, 1);
        assert_eq!(first_b.prev_hash, GENESIS_HASH);
    }

    #[test]
    fn client_ip_is_masked_and_recoverable() {
        let (ledger, _) = ledger();
        let order = OrderId::new();
        let ctx = EventContext {
            ip: Some("203.0.113.42".to_string()),
            user_agent: Some("curl/8.0".to_string()),
            external_ref: None,
        };
        let event = ledger.append(&order, &license(1), &ctx).unwrap();

        assert_eq!(event.ip_masked.as_deref(), Some("203.0.113.x"));
        let encrypted = event.ip_encrypted.expect("ip must be stored encrypted");
        assert!(!encrypted.contains("203.0.113.42"));
        assert_eq!(ledger.decrypt_ip(&encrypted).unwrap(), "203.0.113.42");
    }

    #[test]
    fn malformed_known_payload_is_rejected() {
        let (ledger, _) = ledger();
        let result = ledger.append_raw(
            &OrderId::new(),
            "license.created",
            json!({ "wrong": true }),
            &EventContext::system(),
        );
        assert!(matches!(result, Err(EvidentiaError::Validation { .. })));
    }

    #[test]
    fn unknown_type_with_float_payload_is_rejected() {
        let (ledger, _) = ledger();
        let result = ledger.append_raw(
            &OrderId::new(),
            "crm.note_added",
            json!({ "score": 0.5 }),
            &EventContext::system(),
        );
        match result {
            Err(EvidentiaError::Validation { reason }) => assert!(reason.contains("float")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_appended_as_is() {
        let (ledger, _) = ledger();
        let order = OrderId::new();
        let event = ledger
            .append_raw(&order, "crm.note_added", json!({ "note": "called buyer" }), &EventContext::system())
            .unwrap();
        assert_eq!(event.event_type, "crm.note_added");
        assert!(ledger.verify(&order).unwrap().valid);
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    /// N racing appenders on one order produce exactly sequences 1..=N.
    #[test]
    fn concurrent_appends_produce_contiguous_sequences() {
        const THREADS: usize = 16;
        let (ledger, _) = ledger();
        let order = OrderId::new();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|n| {
                let ledger = ledger.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger
                        .append(&order, &license(n as u32), &EventContext::system())
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = ledger.events(&order).unwrap();
        assert_eq!(events.len(), THREADS);
        let sequences: HashSet<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=THREADS as u64).collect::<HashSet<_>>());
        assert!(ledger.verify(&order).unwrap().valid, "racing appends must keep the chain intact");
    }

    // ── Verification ──────────────────────────────────────────────────────────

    #[test]
    fn untouched_chain_verifies() {
        let (ledger, _) = ledger();
        let order = OrderId::new();
        seed_checkout(&ledger, &order);

        let result = ledger.verify(&order).unwrap();
        assert!(result.valid);
        assert_eq!(result.total_events, 4);
        assert_eq!(result.broken_at_sequence, None);
    }

    /// Flipping one byte of event 3's type is detected at sequence 3.
    #[test]
    fn byte_flip_in_event_type_breaks_at_that_sequence() {
        let (ledger, store) = ledger();
        let order = OrderId::new();
        seed_checkout(&ledger, &order);
        let stored_hash = ledger.events(&order).unwrap()[2].event_hash.clone();

        store
            .tamper(&order, 3, |event| {
                event.event_type = event.event_type.replace("payment", "paymenT");
            })
            .unwrap();

        let result = ledger.verify(&order).unwrap();
        assert!(!result.valid);
        assert_eq!(result.total_events, 4);
        assert_eq!(result.broken_at_sequence, Some(3));
        assert_eq!(result.reason, Some(ChainBreak::HashMismatch));
        assert_eq!(result.actual_hash, Some(stored_hash));
        assert!(result.expected_hash.is_some());
    }

    // ── Reseal ────────────────────────────────────────────────────────────────

    #[test]
    fn reseal_repairs_chain_and_archives_old_hashes() {
        let (ledger, store) = ledger();
        let order = OrderId::new();
        seed_checkout(&ledger, &order);
        let before = ledger.events(&order).unwrap();
        store
            .tamper(&order, 2, |event| event.payload = json!({ "version": "x", "terms_hash": "y" }))
            .unwrap();

        let outcome = ledger.reseal(&order, "ops@example.com", &EventContext::system()).unwrap();

        assert!(outcome.resealed);
        assert!(outcome.chain_valid_after);
        // Events 2, 3 and 4 all get new hashes; event 1 is unchanged.
        assert_eq!(outcome.events_rewritten, 3);
        assert_eq!(outcome.archived_terminal_hash, before[3].event_hash);

        let reseals = ledger.reseals(&order).unwrap();
        assert_eq!(reseals.len(), 1);
        let record = &reseals[0];
        assert_eq!(record.id, outcome.reseal_id);
        assert_eq!(record.rows.len(), 4);
        assert_eq!(record.rows[1].event_hash, before[1].event_hash);

        let after = ledger.events(&order).unwrap();
        assert_eq!(after.len(), 5);
        assert_eq!(after[4].event_type, "ledger.resealed");
        assert_eq!(after[4].payload["archive_digest"], json!(record.archive_digest));
    }

    #[test]
    fn reseal_of_missing_chain_is_not_found() {
        let (ledger, _) = ledger();
        let result = ledger.reseal(&OrderId::new(), "ops", &EventContext::system());
        assert!(matches!(result, Err(EvidentiaError::NotFound { .. })));
    }

    #[test]
    fn purge_removes_chain() {
        let (ledger, _) = ledger();
        let order = OrderId::new();
        seed_checkout(&ledger, &order);

        assert_eq!(ledger.purge(&order).unwrap(), 4);
        assert!(ledger.events(&order).unwrap().is_empty());
    }
}
