//! In-memory implementation of `LedgerStore`.
//!
//! `InMemoryLedgerStore` is the reference implementation of the store
//! contract. Each operation takes the mutex once, so `tail` followed by
//! `insert` is *not* atomic: concurrent appenders genuinely race and the
//! uniqueness check in `insert` decides the winner, exactly as a database
//! constraint would.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use evidentia_contracts::{
    event::ResealRecord, EvidentiaError, EvidentiaResult, LedgerEvent, OrderId,
};

use crate::store::{ChainTail, LedgerStore};

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Default)]
struct LedgerState {
    chains: HashMap<OrderId, Vec<LedgerEvent>>,
    reseals: HashMap<OrderId, Vec<ResealRecord>>,
}

// ── Public store ──────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EvidentiaResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|e| EvidentiaError::storage(format!("ledger state lock poisoned: {e}")))
    }

    /// Modify a stored event in place, bypassing every ledger rule.
    ///
    /// This simulates someone editing the database directly. It exists so
    /// that verification and reseal can be exercised against real tampering.
    pub fn tamper(
        &self,
        order_id: &OrderId,
        sequence: u64,
        edit: impl FnOnce(&mut LedgerEvent),
    ) -> EvidentiaResult<()> {
        let mut state = self.lock()?;
        let event = state
            .chains
            .get_mut(order_id)
            .and_then(|chain| chain.iter_mut().find(|e| e.sequence == sequence))
            .ok_or_else(|| EvidentiaError::not_found("ledger event", format!("{order_id}#{sequence}")))?;
        edit(event);
        Ok(())
    }
}

// ── LedgerStore impl ──────────────────────────────────────────────────────────

impl LedgerStore for InMemoryLedgerStore {
    fn tail(&self, order_id: &OrderId) -> EvidentiaResult<Option<ChainTail>> {
        let state = self.lock()?;
        Ok(state
            .chains
            .get(order_id)
            .and_then(|chain| chain.last())
            .map(|last| ChainTail {
                sequence: last.sequence,
                event_hash: last.event_hash.clone(),
            }))
    }

    fn insert(&self, event: LedgerEvent) -> EvidentiaResult<()> {
        let mut state = self.lock()?;
        let chain = state.chains.entry(event.order_id).or_default();
        if chain.iter().any(|e| e.sequence == event.sequence) {
            return Err(EvidentiaError::SequenceConflict {
                order_id: event.order_id.to_string(),
                sequence: event.sequence,
            });
        }
        chain.push(event);
        chain.sort_by_key(|e| e.sequence);
        Ok(())
    }

    fn events(&self, order_id: &OrderId) -> EvidentiaResult<Vec<LedgerEvent>> {
        let state = self.lock()?;
        Ok(state.chains.get(order_id).cloned().unwrap_or_default())
    }

    fn reseal(
        &self,
        order_id: &OrderId,
        expected_tail: &ChainTail,
        rewritten: Vec<LedgerEvent>,
        record: ResealRecord,
    ) -> EvidentiaResult<()> {
        let mut state = self.lock()?;
        let current_tail = state.chains.get(order_id).and_then(|c| c.last()).map(|last| {
            ChainTail {
                sequence: last.sequence,
                event_hash: last.event_hash.clone(),
            }
        });
        if current_tail.as_ref() != Some(expected_tail) {
            return Err(EvidentiaError::SequenceConflict {
                order_id: order_id.to_string(),
                sequence: expected_tail.sequence + 1,
            });
        }
        state.chains.insert(*order_id, rewritten);
        state.reseals.entry(*order_id).or_default().push(record);
        Ok(())
    }

    fn reseals(&self, order_id: &OrderId) -> EvidentiaResult<Vec<ResealRecord>> {
        let state = self.lock()?;
        Ok(state.reseals.get(order_id).cloned().unwrap_or_default())
    }

    fn purge(&self, order_id: &OrderId) -> EvidentiaResult<u64> {
        let mut state = self.lock()?;
        state.reseals.remove(order_id);
        Ok(state
            .chains
            .remove(order_id)
            .map(|chain| chain.len() as u64)
            .unwrap_or(0))
    }
}
