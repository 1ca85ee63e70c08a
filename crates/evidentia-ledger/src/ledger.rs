//! The per-order event ledger.
//!
//! `EventLedger` turns typed events into hash-chained rows, retries
//! appends that lose the race for a sequence number, verifies chains and
//! performs the audited reseal.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use evidentia_contracts::{
    event::{ArchivedHash, ChainVerification, ResealOutcome, ResealRecord},
    EventContext, EventKind, EvidentiaError, EvidentiaResult, LedgerEvent, OrderId, TypedEvent,
    GENESIS_HASH,
};
use evidentia_crypto::{canonical_sha256, mask_ip, PiiCipher};

use crate::{
    chain::{hash_event, ledger_timestamp, recompute, verify_events},
    store::{ChainTail, LedgerStore},
};

/// Upper bound on attempts for a single append under contention.
pub const DEFAULT_MAX_APPEND_ATTEMPTS: u32 = 64;

/// Append-only, hash-chained event log keyed by order.
#[derive(Clone)]
pub struct EventLedger {
    store: Arc<dyn LedgerStore>,
    cipher: PiiCipher,
    max_attempts: u32,
}

impl EventLedger {
    pub fn new(store: Arc<dyn LedgerStore>, cipher: PiiCipher) -> Self {
        Self {
            store,
            cipher,
            max_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Append a typed event.
    pub fn append(
        &self,
        order_id: &OrderId,
        kind: &EventKind,
        ctx: &EventContext,
    ) -> EvidentiaResult<LedgerEvent> {
        let (event_type, payload) = kind.to_parts()?;
        self.append_raw(order_id, &event_type, payload, ctx)
    }

    /// Append an event given as a raw type string and payload.
    ///
    /// Known types must match their schema. Unknown types are accepted as
    /// long as the payload can be canonicalized.
    pub fn append_raw(
        &self,
        order_id: &OrderId,
        event_type: &str,
        payload: Value,
        ctx: &EventContext,
    ) -> EvidentiaResult<LedgerEvent> {
        if event_type.is_empty() || event_type.contains('\u{1f}') {
            return Err(EvidentiaError::validation(format!(
                "invalid event type {event_type:?}"
            )));
        }
        TypedEvent::decode(event_type, &payload)?;

        let (ip_masked, ip_encrypted) = match ctx.ip.as_deref() {
            Some(ip) => (Some(mask_ip(ip)), Some(self.cipher.encrypt_str(ip)?)),
            None => (None, None),
        };

        for attempt in 1..=self.max_attempts {
            let tail = self.store.tail(order_id)?;
            let (sequence, prev_hash) = match tail {
                Some(t) => (t.sequence + 1, t.event_hash),
                None => (1, GENESIS_HASH.to_string()),
            };
            let created_at = ledger_timestamp(Utc::now());
            let event_hash = hash_event(
                order_id,
                sequence,
                event_type,
                &payload,
                &prev_hash,
                &created_at,
            )
            .map_err(|e| EvidentiaError::validation(format!("payload not hashable: {e}")))?;

            let event = LedgerEvent {
                id: Uuid::new_v4(),
                order_id: *order_id,
                sequence,
                event_type: event_type.to_string(),
                payload: payload.clone(),
                ip_masked: ip_masked.clone(),
                ip_encrypted: ip_encrypted.clone(),
                user_agent: ctx.user_agent.clone(),
                external_ref: ctx.external_ref.clone(),
                prev_hash,
                event_hash,
                created_at,
            };

            match self.store.insert(event.clone()) {
                Ok(()) => {
                    debug!(
                        order_id = %order_id,
                        sequence,
                        event_type,
                        attempt,
                        "ledger event appended"
                    );
                    return Ok(event);
                }
                Err(EvidentiaError::SequenceConflict { .. }) => {
                    debug!(
                        order_id = %order_id,
                        sequence,
                        attempt,
                        "sequence taken by a concurrent append, retrying"
                    );
                }
                Err(other) => return Err(other),
            }
        }

        warn!(
            order_id = %order_id,
            event_type,
            attempts = self.max_attempts,
            "ledger append exhausted its retry budget"
        );
        let sequence = self
            .store
            .tail(order_id)?
            .map(|t| t.sequence + 1)
            .unwrap_or(1);
        Err(EvidentiaError::SequenceConflict {
            order_id: order_id.to_string(),
            sequence,
        })
    }

    /// Replay the chain and report the first discrepancy.
    pub fn verify(&self, order_id: &OrderId) -> EvidentiaResult<ChainVerification> {
        let events = self.store.events(order_id)?;
        let result = verify_events(&events);
        if !result.valid {
            warn!(
                order_id = %order_id,
                broken_at_sequence = ?result.broken_at_sequence,
                reason = ?result.reason,
                "ledger chain verification failed"
            );
        }
        Ok(result)
    }

    pub fn events(&self, order_id: &OrderId) -> EvidentiaResult<Vec<LedgerEvent>> {
        self.store.events(order_id)
    }

    pub fn reseals(&self, order_id: &OrderId) -> EvidentiaResult<Vec<ResealRecord>> {
        self.store.reseals(order_id)
    }

    /// Recompute and rewrite every hash in the chain.
    ///
    /// The superseded hashes are archived in a `ResealRecord` before the
    /// rewrite, and a `ledger.resealed` event committing to the archive's
    /// digest is appended afterwards. Sequence numbers and payloads are
    /// kept as stored.
    pub fn reseal(
        &self,
        order_id: &OrderId,
        actor: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<ResealOutcome> {
        let events = self.store.events(order_id)?;
        let Some(last) = events.last() else {
            return Err(EvidentiaError::not_found("ledger chain", order_id));
        };
        let expected_tail = ChainTail {
            sequence: last.sequence,
            event_hash: last.event_hash.clone(),
        };
        let archived_terminal_hash = last.event_hash.clone();

        let rows: Vec<ArchivedHash> = events
            .iter()
            .map(|e| ArchivedHash {
                sequence: e.sequence,
                prev_hash: e.prev_hash.clone(),
                event_hash: e.event_hash.clone(),
            })
            .collect();
        let archive_digest = canonical_sha256(&rows)?;

        let mut rewritten = Vec::with_capacity(events.len());
        let mut events_rewritten = 0u64;
        let mut prev = GENESIS_HASH.to_string();
        for mut event in events {
            let old_hash = event.event_hash.clone();
            let old_prev = std::mem::replace(&mut event.prev_hash, prev.clone());
            event.event_hash = recompute(&event).map_err(|e| EvidentiaError::Integrity {
                reason: format!(
                    "event {} of order {order_id} cannot be rehashed: {e}",
                    event.sequence
                ),
            })?;
            if event.event_hash != old_hash || event.prev_hash != old_prev {
                events_rewritten += 1;
            }
            prev = event.event_hash.clone();
            rewritten.push(event);
        }

        let record = ResealRecord {
            id: Uuid::new_v4(),
            order_id: *order_id,
            resealed_by: actor.to_string(),
            resealed_at: ledger_timestamp(Utc::now()),
            rows,
            archived_terminal_hash: archived_terminal_hash.clone(),
            archive_digest: archive_digest.clone(),
        };
        let reseal_id = record.id;
        self.store
            .reseal(order_id, &expected_tail, rewritten, record)?;

        warn!(
            order_id = %order_id,
            actor,
            events_rewritten,
            archived_terminal_hash = %archived_terminal_hash,
            "ledger chain resealed"
        );

        self.append(
            order_id,
            &EventKind::LedgerResealed {
                reseal_id,
                resealed_by: actor.to_string(),
                events_rewritten,
                archived_terminal_hash: archived_terminal_hash.clone(),
                archive_digest,
            },
            ctx,
        )?;

        let after = self.verify(order_id)?;
        info!(order_id = %order_id, chain_valid_after = after.valid, "reseal complete");

        Ok(ResealOutcome {
            resealed: true,
            chain_valid_after: after.valid,
            events_rewritten,
            reseal_id,
            archived_terminal_hash,
        })
    }

    /// Recover a raw IP from its encrypted column.
    pub fn decrypt_ip(&self, encrypted: &str) -> EvidentiaResult<String> {
        Ok(self.cipher.decrypt_str(encrypted)?)
    }

    /// Delete an order's chain and its reseal archives.
    pub fn purge(&self, order_id: &OrderId) -> EvidentiaResult<u64> {
        let removed = self.store.purge(order_id)?;
        info!(order_id = %order_id, removed, "ledger chain purged");
        Ok(removed)
    }
}
