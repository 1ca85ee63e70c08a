//! In-memory stores and collaborators.
//!
//! `InMemoryStore` is the reference implementation of every store contract.
//! All tables share one mutex, so each closure-based update is atomic with
//! respect to every other store call: the closure runs against a copy of
//! the rows and the copy is written back only when it returns `Ok`.
//!
//! The collaborator doubles (`RecordingMailer`, `ManualClock`, ...) back the
//! demo binary and the test suites.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use evidentia_contracts::{
    evidence::{EvidenceAttachment, ManualSale},
    notification::{NotificationLog, NotificationOutcome},
    token::DownloadToken,
    DeliveryStage, EvidentiaError, EvidentiaResult, Order, OrderId, StageId,
};
use evidentia_ledger::{EventLedger, InMemoryLedgerStore};

use crate::{
    context::{CoreContext, DeliverySettings, KeyMaterial},
    range::ByteRange,
    traits::{
        AttachmentStore, Clock, DeliveryStore, DownloadRecords, FileChunks, FileMeta, FileStore,
        GeoLocation, GeoResolver, Mailer, NotificationClaim, NotificationStore, OutgoingMail,
        PurgeCounts, SaleStore, SettingsProvider, StoreIdentity,
    },
};

/// Size of the chunks `InMemoryFileStore::stream` yields.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    orders: HashMap<OrderId, Order>,
    stages: HashMap<StageId, DeliveryStage>,
    tokens: HashMap<String, DownloadToken>,
    notifications: HashMap<String, NotificationLog>,
    attachments: Vec<EvidenceAttachment>,
    sales: HashMap<Uuid, ManualSale>,
}

fn lock<T>(mutex: &Mutex<T>) -> EvidentiaResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| EvidentiaError::storage(format!("store lock poisoned: {e}")))
}

// ── InMemoryStore ─────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryStore for InMemoryStore {
    fn insert_order(&self, order: Order, stages: Vec<DeliveryStage>) -> EvidentiaResult<()> {
        let mut state = lock(&self.state)?;
        if state.orders.contains_key(&order.id)
            || state
                .orders
                .values()
                .any(|o| o.order_number == order.order_number)
        {
            return Err(EvidentiaError::Duplicate {
                entity: "order",
                key: order.order_number.clone(),
            });
        }
        for stage in stages {
            state.stages.insert(stage.id, stage);
        }
        state.orders.insert(order.id, order);
        Ok(())
    }

    fn order(&self, id: &OrderId) -> EvidentiaResult<Option<Order>> {
        Ok(lock(&self.state)?.orders.get(id).cloned())
    }

    fn find_order_by_payment_ref(&self, reference: &str) -> EvidentiaResult<Option<Order>> {
        let state = lock(&self.state)?;
        Ok(state
            .orders
            .values()
            .find(|o| {
                o.payment.provider_order_id.as_deref() == Some(reference)
                    || o.payment.capture_id.as_deref() == Some(reference)
            })
            .cloned())
    }

    fn update_order(
        &self,
        id: &OrderId,
        apply: &mut dyn FnMut(&mut Order) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<Order> {
        let mut state = lock(&self.state)?;
        let mut order = state
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| EvidentiaError::not_found("order", id))?;
        apply(&mut order)?;
        state.orders.insert(*id, order.clone());
        Ok(order)
    }

    fn stage(&self, id: &StageId) -> EvidentiaResult<Option<DeliveryStage>> {
        Ok(lock(&self.state)?.stages.get(id).cloned())
    }

    fn stages_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<DeliveryStage>> {
        let state = lock(&self.state)?;
        let mut stages: Vec<_> = state
            .stages
            .values()
            .filter(|s| s.order_id == *order_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.stage_order);
        Ok(stages)
    }

    fn update_stage(
        &self,
        id: &StageId,
        apply: &mut dyn FnMut(&Order, &mut DeliveryStage) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<DeliveryStage> {
        let mut state = lock(&self.state)?;
        let mut stage = state
            .stages
            .get(id)
            .cloned()
            .ok_or_else(|| EvidentiaError::not_found("stage", id))?;
        let order = state
            .orders
            .get(&stage.order_id)
            .ok_or_else(|| EvidentiaError::not_found("order", stage.order_id))?;
        apply(order, &mut stage)?;
        state.stages.insert(*id, stage.clone());
        Ok(stage)
    }

    fn insert_token(
        &self,
        token: DownloadToken,
        admit: &mut dyn FnMut(&Order, Option<&DeliveryStage>) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<()> {
        let mut state = lock(&self.state)?;
        let order = state
            .orders
            .get(&token.order_id)
            .ok_or_else(|| EvidentiaError::not_found("order", token.order_id))?;
        let stage = match token.stage_id {
            Some(stage_id) => Some(
                state
                    .stages
                    .get(&stage_id)
                    .filter(|s| s.order_id == token.order_id)
                    .ok_or_else(|| EvidentiaError::not_found("stage", stage_id))?,
            ),
            None => None,
        };
        admit(order, stage)?;
        if state.tokens.contains_key(&token.token_hash) {
            return Err(EvidentiaError::Duplicate {
                entity: "download token",
                key: token.hash_prefix().to_string(),
            });
        }
        state.tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    fn token(&self, token_hash: &str) -> EvidentiaResult<Option<DownloadToken>> {
        Ok(lock(&self.state)?.tokens.get(token_hash).cloned())
    }

    fn tokens_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<DownloadToken>> {
        let state = lock(&self.state)?;
        let mut tokens: Vec<_> = state
            .tokens
            .values()
            .filter(|t| t.order_id == *order_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.issued_at);
        Ok(tokens)
    }

    fn modify_download(
        &self,
        token_hash: &str,
        apply: &mut dyn FnMut(&mut DownloadRecords) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<DownloadRecords> {
        let mut state = lock(&self.state)?;
        let token = state
            .tokens
            .get(token_hash)
            .cloned()
            .ok_or_else(|| EvidentiaError::not_found("download token", "<redacted>"))?;
        let order = state
            .orders
            .get(&token.order_id)
            .cloned()
            .ok_or_else(|| EvidentiaError::not_found("order", token.order_id))?;
        let stage = match token.stage_id {
            Some(id) => Some(
                state
                    .stages
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| EvidentiaError::not_found("stage", id))?,
            ),
            None => None,
        };

        let mut records = DownloadRecords { token, order, stage };
        apply(&mut records)?;

        state
            .tokens
            .insert(records.token.token_hash.clone(), records.token.clone());
        state.orders.insert(records.order.id, records.order.clone());
        if let Some(stage) = &records.stage {
            state.stages.insert(stage.id, stage.clone());
        }
        Ok(records)
    }

    fn purge_order(&self, order_id: &OrderId) -> EvidentiaResult<PurgeCounts> {
        let mut state = lock(&self.state)?;
        let orders = u64::from(state.orders.remove(order_id).is_some());
        let stages_before = state.stages.len();
        state.stages.retain(|_, s| s.order_id != *order_id);
        let tokens_before = state.tokens.len();
        state.tokens.retain(|_, t| t.order_id != *order_id);
        Ok(PurgeCounts {
            orders,
            stages: (stages_before - state.stages.len()) as u64,
            tokens: (tokens_before - state.tokens.len()) as u64,
        })
    }
}

impl NotificationStore for InMemoryStore {
    fn claim_notification(&self, log: NotificationLog) -> EvidentiaResult<NotificationClaim> {
        let mut state = lock(&self.state)?;
        if let Some(existing) = state.notifications.get(&log.event_id) {
            return Ok(NotificationClaim::Duplicate(existing.clone()));
        }
        state.notifications.insert(log.event_id.clone(), log);
        Ok(NotificationClaim::Claimed)
    }

    fn reclaim_retryable(
        &self,
        event_id: &str,
        raw_payload: &str,
        received_at: DateTime<Utc>,
    ) -> EvidentiaResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(row) = state.notifications.get_mut(event_id) else {
            return Ok(false);
        };
        if !row.is_reclaimable() {
            return Ok(false);
        }
        row.raw_payload = raw_payload.to_string();
        row.signature_valid = None;
        row.outcome = NotificationOutcome::Received;
        row.detail = None;
        row.received_at = received_at;
        row.processed_at = None;
        Ok(true)
    }

    fn update_notification(
        &self,
        event_id: &str,
        apply: &mut dyn FnMut(&mut NotificationLog),
    ) -> EvidentiaResult<NotificationLog> {
        let mut state = lock(&self.state)?;
        let row = state
            .notifications
            .get_mut(event_id)
            .ok_or_else(|| EvidentiaError::not_found("notification", event_id))?;
        apply(row);
        Ok(row.clone())
    }

    fn notification(&self, event_id: &str) -> EvidentiaResult<Option<NotificationLog>> {
        Ok(lock(&self.state)?.notifications.get(event_id).cloned())
    }

    fn notifications_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<NotificationLog>> {
        let state = lock(&self.state)?;
        let mut rows: Vec<_> = state
            .notifications
            .values()
            .filter(|n| n.order_id.as_ref() == Some(order_id))
            .cloned()
            .collect();
        rows.sort_by_key(|n| n.received_at);
        Ok(rows)
    }

    fn purge_notifications(&self, order_id: &OrderId) -> EvidentiaResult<u64> {
        let mut state = lock(&self.state)?;
        let before = state.notifications.len();
        state
            .notifications
            .retain(|_, n| n.order_id.as_ref() != Some(order_id));
        Ok((before - state.notifications.len()) as u64)
    }
}

impl AttachmentStore for InMemoryStore {
    fn insert_attachment(&self, attachment: EvidenceAttachment) -> EvidentiaResult<()> {
        lock(&self.state)?.attachments.push(attachment);
        Ok(())
    }

    fn attachments_for_order(&self, order_id: &OrderId) -> EvidentiaResult<Vec<EvidenceAttachment>> {
        let state = lock(&self.state)?;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.order_id == *order_id)
            .cloned()
            .collect())
    }

    fn purge_attachments(&self, order_id: &OrderId) -> EvidentiaResult<Vec<EvidenceAttachment>> {
        let mut state = lock(&self.state)?;
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.attachments)
            .into_iter()
            .partition(|a| a.order_id == *order_id);
        state.attachments = kept;
        Ok(removed)
    }
}

impl SaleStore for InMemoryStore {
    fn insert_sale(&self, sale: ManualSale) -> EvidentiaResult<()> {
        let mut state = lock(&self.state)?;
        if state.sales.values().any(|s| s.link_hash == sale.link_hash) {
            return Err(EvidentiaError::Duplicate {
                entity: "manual sale",
                key: sale.id.to_string(),
            });
        }
        state.sales.insert(sale.id, sale);
        Ok(())
    }

    fn sale_by_link_hash(&self, link_hash: &str) -> EvidentiaResult<Option<ManualSale>> {
        let state = lock(&self.state)?;
        Ok(state
            .sales
            .values()
            .find(|s| s.link_hash == link_hash)
            .cloned())
    }

    fn update_sale(
        &self,
        id: &Uuid,
        apply: &mut dyn FnMut(&mut ManualSale) -> EvidentiaResult<()>,
    ) -> EvidentiaResult<ManualSale> {
        let mut state = lock(&self.state)?;
        let mut sale = state
            .sales
            .get(id)
            .cloned()
            .ok_or_else(|| EvidentiaError::not_found("manual sale", id))?;
        apply(&mut sale)?;
        state.sales.insert(*id, sale.clone());
        Ok(sale)
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

struct StoredObject {
    content: Arc<Vec<u8>>,
    content_type: String,
}

#[derive(Clone, Default)]
pub struct InMemoryFileStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).is_ok_and(|objects| objects.contains_key(key))
    }
}

impl FileStore for InMemoryFileStore {
    fn upload(&self, key: &str, content: &[u8], content_type: &str) -> EvidentiaResult<()> {
        lock(&self.objects)?.insert(
            key.to_string(),
            StoredObject {
                content: Arc::new(content.to_vec()),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn head(&self, key: &str) -> EvidentiaResult<Option<FileMeta>> {
        Ok(lock(&self.objects)?.get(key).map(|o| FileMeta {
            size: o.content.len() as u64,
            content_type: Some(o.content_type.clone()),
        }))
    }

    fn stream(&self, key: &str, range: Option<ByteRange>) -> EvidentiaResult<FileChunks> {
        let content = lock(&self.objects)?
            .get(key)
            .map(|o| Arc::clone(&o.content))
            .ok_or_else(|| EvidentiaError::not_found("file", key))?;
        let len = content.len() as u64;
        let (start, end) = match range {
            Some(r) if r.start < len => (r.start as usize, (r.end.min(len - 1) + 1) as usize),
            Some(_) => {
                return Err(EvidentiaError::validation(format!(
                    "range starts past the end of {key}"
                )))
            }
            None => (0, content.len()),
        };
        let chunks = (start..end)
            .step_by(STREAM_CHUNK_SIZE)
            .map(move |offset| {
                let stop = (offset + STREAM_CHUNK_SIZE).min(end);
                Ok(content[offset..stop].to_vec())
            });
        Ok(Box::new(chunks))
    }

    fn delete(&self, key: &str) -> EvidentiaResult<()> {
        lock(&self.objects)?.remove(key);
        Ok(())
    }
}

// ── Mail ──────────────────────────────────────────────────────────────────────

/// Records every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    failures_remaining: AtomicU32,
    next_id: AtomicU64,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` send attempts.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        lock(&self.sent).map(|s| s.clone()).unwrap_or_default()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, mail: &OutgoingMail) -> EvidentiaResult<String> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EvidentiaError::External {
                service: "mail",
                reason: "simulated outage".to_string(),
            });
        }
        lock(&self.sent)?.push(mail.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("msg-{id}"))
    }
}

// ── Geo, settings, clock ──────────────────────────────────────────────────────

/// Lookup table keyed by exact IP string.
#[derive(Default)]
pub struct StaticGeoResolver {
    entries: Mutex<HashMap<String, GeoLocation>>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: impl Into<String>, location: GeoLocation) {
        if let Ok(mut entries) = lock(&self.entries) {
            entries.insert(ip.into(), location);
        }
    }
}

impl GeoResolver for StaticGeoResolver {
    fn locate(&self, ip: &str) -> Option<GeoLocation> {
        lock(&self.entries).ok()?.get(ip).cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub StoreIdentity);

impl SettingsProvider for StaticSettings {
    fn store_identity(&self) -> StoreIdentity {
        self.0.clone()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = lock(&self.now) {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = lock(&self.now) {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        lock(&self.now).map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

// ── Backend bundle ────────────────────────────────────────────────────────────

/// A complete in-memory backend and the `CoreContext` wired to it.
///
/// The concrete handles stay reachable so callers can seed files, inspect
/// sent mail or tamper with the ledger.
#[derive(Clone)]
pub struct InMemoryBackend {
    pub store: InMemoryStore,
    pub files: InMemoryFileStore,
    pub ledger_store: InMemoryLedgerStore,
    pub mailer: Arc<RecordingMailer>,
    pub geo: Arc<StaticGeoResolver>,
    context: CoreContext,
}

impl InMemoryBackend {
    pub fn new(
        keys: &KeyMaterial,
        settings: DeliverySettings,
        identity: StoreIdentity,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = InMemoryStore::new();
        let files = InMemoryFileStore::new();
        let ledger_store = InMemoryLedgerStore::new();
        let mailer = Arc::new(RecordingMailer::new());
        let geo = Arc::new(StaticGeoResolver::new());

        let context = CoreContext {
            delivery_store: Arc::new(store.clone()),
            notifications: Arc::new(store.clone()),
            attachments: Arc::new(store.clone()),
            sales: Arc::new(store.clone()),
            files: Arc::new(files.clone()),
            ledger: EventLedger::new(Arc::new(ledger_store.clone()), keys.cipher()),
            signer: keys.signer(),
            redeem_hasher: keys.redeem_hasher(),
            cipher: keys.cipher(),
            mailer: mailer.clone(),
            geo: geo.clone(),
            settings_provider: Arc::new(StaticSettings(identity)),
            clock,
            settings,
        };
        Self {
            store,
            files,
            ledger_store,
            mailer,
            geo,
            context,
        }
    }

    pub fn context(&self) -> CoreContext {
        self.context.clone()
    }
}
