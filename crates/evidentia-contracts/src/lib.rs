//! # evidentia-contracts
//!
//! Shared types for the Evidentia delivery and evidence core.
//!
//! All crates in the workspace import from here. Apart from the order
//! transition table, nothing in this crate makes a decision.

pub mod error;
pub mod event;
pub mod evidence;
pub mod notification;
pub mod order;
pub mod stage;
pub mod token;

pub use error::{ConflictCode, EvidentiaError, EvidentiaResult};
pub use event::{EventContext, EventKind, LedgerEvent, TypedEvent, GENESIS_HASH};
pub use order::{Order, OrderId, OrderStatus};
pub use stage::{DeliveryStage, StageId, StageStatus};

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use token::hash_prefix;

    // ── OrderStatus transitions ──────────────────────────────────────────────

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Refunded));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Disputed));
    }

    #[test]
    fn frozen_is_never_a_payment_transition() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Confirmed,
            OrderStatus::Refunded,
            OrderStatus::Disputed,
            OrderStatus::Revoked,
        ] {
            assert!(
                !status.can_transition_to(OrderStatus::Frozen),
                "{status} must not reach frozen through a payment transition"
            );
        }
    }

    #[test]
    fn revoked_is_terminal() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Confirmed,
            OrderStatus::Refunded,
            OrderStatus::Disputed,
        ] {
            assert!(!OrderStatus::Revoked.can_transition_to(next));
        }
    }

    #[test]
    fn pending_cannot_skip_to_confirmed() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
    }

    // ── EventKind ────────────────────────────────────────────────────────────

    #[test]
    fn event_kind_splits_into_type_and_payload() {
        let kind = EventKind::LicenseCreated {
            license_key: "ABCD-EFGH-IJKL-MNOP".to_string(),
        };
        let (event_type, payload) = kind.to_parts().unwrap();
        assert_eq!(event_type, "license.created");
        assert_eq!(payload, json!({ "license_key": "ABCD-EFGH-IJKL-MNOP" }));
    }

    #[test]
    fn every_variant_type_is_listed_as_known() {
        let kind = EventKind::DownloadDenied {
            token_hash_prefix: "abcdef012345".to_string(),
            reason: "frozen".to_string(),
        };
        let (event_type, _) = kind.to_parts().unwrap();
        assert!(EventKind::is_known(&event_type));
    }

    #[test]
    fn decode_known_type_round_trips() {
        let kind = EventKind::TermsAccepted {
            version: "2024-01".to_string(),
            terms_hash: "00ff".to_string(),
        };
        let (event_type, payload) = kind.to_parts().unwrap();
        let decoded = TypedEvent::decode(&event_type, &payload).unwrap();
        assert_eq!(decoded, TypedEvent::Known(kind));
    }

    #[test]
    fn decode_rejects_malformed_known_payload() {
        let result = TypedEvent::decode("license.created", &json!({ "key": 42 }));
        match result {
            Err(EvidentiaError::Validation { reason }) => {
                assert!(reason.contains("license.created"), "unexpected reason: {reason}");
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn decode_keeps_unknown_types_as_other() {
        let payload = json!({ "anything": [1, 2, 3] });
        let decoded = TypedEvent::decode("crm.note_added", &payload).unwrap();
        assert_eq!(
            decoded,
            TypedEvent::Other {
                event_type: "crm.note_added".to_string(),
                payload
            }
        );
    }

    // ── Tokens ───────────────────────────────────────────────────────────────

    #[test]
    fn hash_prefix_truncates_to_twelve_chars() {
        let hash = "0123456789abcdef0123456789abcdef";
        assert_eq!(hash_prefix(hash), "0123456789ab");
        assert_eq!(hash_prefix("abc"), "abc");
    }

    // ── EvidentiaError display messages ──────────────────────────────────────

    #[test]
    fn error_state_conflict_display_includes_code() {
        let err = EvidentiaError::conflict(ConflictCode::Frozen, "order is frozen");
        let msg = err.to_string();
        assert!(msg.contains("[frozen]"));
        assert!(msg.contains("order is frozen"));
    }

    #[test]
    fn error_not_found_display() {
        let err = EvidentiaError::not_found("order", "1234");
        assert_eq!(err.to_string(), "order not found: 1234");
    }

    #[test]
    fn error_sequence_conflict_display() {
        let err = EvidentiaError::SequenceConflict {
            order_id: "o-1".to_string(),
            sequence: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("sequence 7"));
        assert!(msg.contains("o-1"));
    }

    #[test]
    fn error_external_display_names_service() {
        let err = EvidentiaError::External {
            service: "mailer",
            reason: "smtp timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mailer"));
        assert!(msg.contains("smtp timeout"));
    }
}
