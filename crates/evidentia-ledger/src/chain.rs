//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (UTF-8, fields joined by U+001F):
//!   1. order_id (hyphenated UUID)
//!   2. sequence as decimal
//!   3. event_type
//!   4. canonical JSON of payload
//!   5. prev_hash (64 hex chars, or `GENESIS`)
//!   6. created_at as RFC 3339 with milliseconds and `Z`
//!
//! U+001F cannot appear in fields 1, 2, 5 or 6, and canonical JSON escapes
//! it, so the layout is unambiguous. Every field is listed explicitly so
//! nothing is accidentally omitted.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use evidentia_contracts::{
    event::{ChainBreak, ChainVerification},
    LedgerEvent, OrderId, GENESIS_HASH,
};
use evidentia_crypto::{CanonicalBytes, CryptoError};

const FIELD_SEPARATOR: &[u8] = "\u{1f}".as_bytes();

/// Truncate a timestamp to the millisecond precision that is hashed and
/// stored.
pub fn ledger_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// The exact timestamp string that enters the hash.
pub fn hash_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute the SHA-256 hash for a single ledger event.
///
/// Fails only if `payload` cannot be canonicalized (it contains a float).
/// Returns a lowercase 64-character hex string.
pub fn hash_event(
    order_id: &OrderId,
    sequence: u64,
    event_type: &str,
    payload: &Value,
    prev_hash: &str,
    created_at: &DateTime<Utc>,
) -> Result<String, CryptoError> {
    let canonical = CanonicalBytes::from_value(payload)?;

    let mut hasher = Sha256::new();
    hasher.update(order_id.to_string().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(event_type.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(canonical.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(prev_hash.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(hash_timestamp(created_at).as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// Recompute the hash of a stored event from its own fields.
pub fn recompute(event: &LedgerEvent) -> Result<String, CryptoError> {
    hash_event(
        &event.order_id,
        event.sequence,
        &event.event_type,
        &event.payload,
        &event.prev_hash,
        &event.created_at,
    )
}

/// Replay an order's events and report the first discrepancy.
///
/// Events must be ordered by sequence. Three rules are checked per event:
///
/// 1. **Contiguity**: sequences run 1, 2, 3, … without gaps.
/// 2. **Prev-hash linkage**: each stored `prev_hash` equals the recomputed
///    hash of the preceding event (or `GENESIS` for the first).
/// 3. **Hash correctness**: each stored `event_hash` equals the hash
///    recomputed from the stored fields.
///
/// An empty chain is valid.
pub fn verify_events(events: &[LedgerEvent]) -> ChainVerification {
    let total_events = events.len() as u64;
    let mut expected_prev = GENESIS_HASH.to_string();

    for (idx, event) in events.iter().enumerate() {
        let expected_sequence = idx as u64 + 1;
        if event.sequence != expected_sequence {
            return broken(
                total_events,
                expected_sequence,
                ChainBreak::SequenceGap,
                None,
                Some(event.event_hash.clone()),
            );
        }

        if event.prev_hash != expected_prev {
            return broken(
                total_events,
                event.sequence,
                ChainBreak::PrevHashMismatch,
                Some(expected_prev),
                Some(event.prev_hash.clone()),
            );
        }

        let recomputed = match recompute(event) {
            Ok(hash) => hash,
            Err(_) => {
                return broken(
                    total_events,
                    event.sequence,
                    ChainBreak::HashMismatch,
                    None,
                    Some(event.event_hash.clone()),
                )
            }
        };
        if recomputed != event.event_hash {
            return broken(
                total_events,
                event.sequence,
                ChainBreak::HashMismatch,
                Some(recomputed),
                Some(event.event_hash.clone()),
            );
        }

        // Link against the recomputed hash, not the stored one.
        expected_prev = recomputed;
    }

    ChainVerification::intact(total_events)
}

fn broken(
    total_events: u64,
    sequence: u64,
    reason: ChainBreak,
    expected_hash: Option<String>,
    actual_hash: Option<String>,
) -> ChainVerification {
    ChainVerification {
        valid: false,
        total_events,
        broken_at_sequence: Some(sequence),
        expected_hash,
        actual_hash,
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap()
    }

    fn event(order_id: OrderId, sequence: u64, event_type: &str, prev_hash: &str) -> LedgerEvent {
        let payload = json!({ "n": sequence });
        let event_hash =
            hash_event(&order_id, sequence, event_type, &payload, prev_hash, &at()).unwrap();
        LedgerEvent {
            id: Uuid::new_v4(),
            order_id,
            sequence,
            event_type: event_type.to_string(),
            payload,
            ip_masked: None,
            ip_encrypted: None,
            user_agent: None,
            external_ref: None,
            prev_hash: prev_hash.to_string(),
            event_hash,
            created_at: at(),
        }
    }

    fn chain(order_id: OrderId, types: &[&str]) -> Vec<LedgerEvent> {
        let mut prev = GENESIS_HASH.to_string();
        let mut out = Vec::new();
        for (idx, event_type) in types.iter().enumerate() {
            let e = event(order_id, idx as u64 + 1, event_type, &prev);
            prev = e.event_hash.clone();
            out.push(e);
        }
        out
    }

    #[test]
    fn timestamp_string_has_millisecond_precision() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(hash_timestamp(&ledger_timestamp(t)), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn hash_changes_with_every_field() {
        let order = OrderId::new();
        let payload = json!({ "a": 1 });
        let base = hash_event(&order, 1, "order.created", &payload, GENESIS_HASH, &at()).unwrap();

        let variants = [
            hash_event(&OrderId::new(), 1, "order.created", &payload, GENESIS_HASH, &at()),
            hash_event(&order, 2, "order.created", &payload, GENESIS_HASH, &at()),
            hash_event(&order, 1, "order.frozen", &payload, GENESIS_HASH, &at()),
            hash_event(&order, 1, "order.created", &json!({ "a": 2 }), GENESIS_HASH, &at()),
            hash_event(&order, 1, "order.created", &payload, "deadbeef", &at()),
            hash_event(
                &order,
                1,
                "order.created",
                &payload,
                GENESIS_HASH,
                &(at() + chrono::Duration::milliseconds(1)),
            ),
        ];
        for v in variants {
            assert_ne!(v.unwrap(), base);
        }
    }

    #[test]
    fn intact_chain_verifies() {
        let events = chain(OrderId::new(), &["order.created", "terms.accepted", "payment.captured"]);
        assert_eq!(verify_events(&events), ChainVerification::intact(3));
    }

    #[test]
    fn empty_chain_is_valid() {
        assert!(verify_events(&[]).valid);
    }

    #[test]
    fn payload_tamper_reports_hash_mismatch() {
        let mut events = chain(OrderId::new(), &["order.created", "terms.accepted"]);
        events[1].payload = json!({ "n": 99 });

        let result = verify_events(&events);
        assert!(!result.valid);
        assert_eq!(result.broken_at_sequence, Some(2));
        assert_eq!(result.reason, Some(ChainBreak::HashMismatch));
        assert_eq!(result.actual_hash.as_deref(), Some(events[1].event_hash.as_str()));
        assert_ne!(result.expected_hash, result.actual_hash);
    }

    #[test]
    fn relinked_prev_hash_reports_prev_mismatch() {
        let order = OrderId::new();
        let mut events = chain(order, &["order.created", "terms.accepted"]);
        // Re-sign event 2 over a fabricated predecessor.
        events[1] = event(order, 2, "terms.accepted", "f".repeat(64).as_str());

        let result = verify_events(&events);
        assert_eq!(result.broken_at_sequence, Some(2));
        assert_eq!(result.reason, Some(ChainBreak::PrevHashMismatch));
    }

    #[test]
    fn missing_event_reports_sequence_gap() {
        let mut events = chain(OrderId::new(), &["a.one", "a.two", "a.three"]);
        events.remove(1);

        let result = verify_events(&events);
        assert_eq!(result.broken_at_sequence, Some(2));
        assert_eq!(result.reason, Some(ChainBreak::SequenceGap));
    }
}
