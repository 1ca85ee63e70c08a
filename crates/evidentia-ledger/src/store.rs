//! Persistence seam for ledger events.

use evidentia_contracts::{
    event::ResealRecord, EvidentiaResult, LedgerEvent, OrderId,
};

/// The position of the last event in an order's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    pub sequence: u64,
    pub event_hash: String,
}

/// Backing store for ledger events.
///
/// # Contract
///
/// - `(order_id, sequence)` is unique. `insert` of an existing pair fails
///   with `EvidentiaError::SequenceConflict` and leaves the store unchanged.
/// - Rows are never updated, except by `reseal`, which replaces the hash
///   columns of a whole chain in one atomic step and records the archive.
/// - Different orders never contend with each other.
pub trait LedgerStore: Send + Sync {
    /// The last event of the chain, or `None` for an empty chain.
    fn tail(&self, order_id: &OrderId) -> EvidentiaResult<Option<ChainTail>>;

    /// Insert one event, enforcing `(order_id, sequence)` uniqueness.
    fn insert(&self, event: LedgerEvent) -> EvidentiaResult<()>;

    /// All events of an order, ordered by sequence.
    fn events(&self, order_id: &OrderId) -> EvidentiaResult<Vec<LedgerEvent>>;

    /// Atomically replace an order's chain with `rewritten` and store
    /// `record`.
    ///
    /// Fails with `SequenceConflict` if the chain's tail is no longer
    /// `expected_tail`, i.e. an event was appended since the caller read it.
    fn reseal(
        &self,
        order_id: &OrderId,
        expected_tail: &ChainTail,
        rewritten: Vec<LedgerEvent>,
        record: ResealRecord,
    ) -> EvidentiaResult<()>;

    /// Every reseal archive for an order, oldest first.
    fn reseals(&self, order_id: &OrderId) -> EvidentiaResult<Vec<ResealRecord>>;

    /// Remove an order's events and reseal archives. Returns the number of
    /// events removed.
    fn purge(&self, order_id: &OrderId) -> EvidentiaResult<u64>;
}
