//! The notification ingester.
//!
//! Pipeline for one delivery of a provider notification:
//!
//!   parse → claim event id → verify signature → validate envelope →
//!   match order → transition → record outcome
//!
//! Claiming the event id is the idempotency guard: a second delivery of the
//! same id finds the existing row and is acknowledged without reprocessing.
//! Rows whose signature failed, or whose processing stopped on an outage,
//! stay reclaimable, so a genuine retry is still processed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use evidentia_contracts::{
    notification::{NotificationLog, NotificationOutcome},
    EventContext, EventKind, EvidentiaError, EvidentiaResult, Order, OrderId,
};
use evidentia_core::{
    traits::{NotificationClaim, ProviderVerifier},
    DeliveryStateMachine,
};

use crate::envelope::{
    EnvelopeValidator, NotificationEnvelope, CAPTURE_COMPLETED, CAPTURE_REFUNDED,
    CAPTURE_REVERSED, DISPUTE_CREATED,
};

/// What the ingester did with one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The event id was already processed.
    Duplicate { event_id: String },
    InvalidSignature { event_id: String },
    /// Not JSON, no event id, or the envelope failed schema validation.
    Malformed { reason: String },
    Processed { event_id: String, order_id: OrderId },
    Ignored { event_id: String },
    NoMatchingOrder { event_id: String },
    TransitionRejected {
        event_id: String,
        order_id: OrderId,
        reason: String,
    },
}

impl IngestOutcome {
    /// Status to answer the provider with. Everything except a bad
    /// signature or a malformed body is acknowledged so the provider stops
    /// retrying.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidSignature { .. } => 401,
            Self::Malformed { .. } => 400,
            _ => 200,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::InvalidSignature { .. } => "invalid_signature",
            Self::Malformed { .. } => "malformed",
            Self::Processed { .. } => "processed",
            Self::Ignored { .. } => "ignored",
            Self::NoMatchingOrder { .. } => "no_matching_order",
            Self::TransitionRejected { .. } => "transition_rejected",
        }
    }
}

/// Idempotent consumer of provider notifications.
#[derive(Clone)]
pub struct NotificationIngester {
    machine: DeliveryStateMachine,
    verifier: Arc<dyn ProviderVerifier>,
    envelopes: Arc<EnvelopeValidator>,
}

impl NotificationIngester {
    pub fn new(
        machine: DeliveryStateMachine,
        verifier: Arc<dyn ProviderVerifier>,
    ) -> EvidentiaResult<Self> {
        Ok(Self {
            machine,
            verifier,
            envelopes: Arc::new(EnvelopeValidator::new()?),
        })
    }

    /// Process one delivery.
    ///
    /// `Err` is returned only for store failures or an unavailable
    /// verification service; the provider should retry those. The row is
    /// left `failed`, so the retry is processed rather than acknowledged as
    /// a duplicate.
    pub fn ingest(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> EvidentiaResult<IngestOutcome> {
        let ctx = self.machine.context();
        let now = ctx.clock.now();

        // ── Step 1: Parse and extract the event id ───────────────────────────
        let Ok(raw) = std::str::from_utf8(raw_body) else {
            return Ok(malformed("body is not UTF-8"));
        };
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return Ok(malformed("body is not JSON"));
        };
        let Some(event_id) = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
        else {
            return Ok(malformed("notification has no event id"));
        };
        let event_type = value
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // ── Step 2: Claim the event id ───────────────────────────────────────
        let log = NotificationLog {
            event_id: event_id.clone(),
            event_type: event_type.clone(),
            raw_payload: raw.to_string(),
            signature_valid: None,
            outcome: NotificationOutcome::Received,
            order_id: None,
            detail: None,
            received_at: now,
            processed_at: None,
        };
        if let NotificationClaim::Duplicate(existing) = ctx.notifications.claim_notification(log)? {
            let reclaimed = existing.is_reclaimable()
                && ctx.notifications.reclaim_retryable(&event_id, raw, now)?;
            if !reclaimed {
                info!(
                    event_id = %event_id,
                    outcome = %existing.outcome.as_str(),
                    "duplicate notification acknowledged"
                );
                return Ok(IngestOutcome::Duplicate { event_id });
            }
            debug!(
                event_id = %event_id,
                previous = %existing.outcome.as_str(),
                "notification row reclaimed for retry"
            );
        }

        // ── Step 3: Signature ────────────────────────────────────────────────
        let valid = match self.verifier.verify(raw_body, signature_header) {
            Ok(valid) => valid,
            Err(e) => {
                error!(event_id = %event_id, error = %e, "signature verification unavailable");
                return Err(self.fail(&event_id, None, e));
            }
        };
        if !valid {
            warn!(event_id = %event_id, event_type = %event_type, "notification signature invalid");
            self.finish(&event_id, Some(false), NotificationOutcome::InvalidSignature, None, None)?;
            return Ok(IngestOutcome::InvalidSignature { event_id });
        }

        // ── Step 4: Envelope ─────────────────────────────────────────────────
        let envelope = match self.envelopes.validate(&value) {
            Ok(envelope) => envelope,
            Err(violations) => {
                let reason = violations.join("; ");
                self.finish(&event_id, Some(true), NotificationOutcome::Malformed, None, Some(reason.clone()))?;
                return Ok(IngestOutcome::Malformed { reason });
            }
        };

        // ── Step 5: Dispatch ─────────────────────────────────────────────────
        let outcome = match self.dispatch(&envelope) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(event_id = %event_id, error = %e, "notification processing failed");
                return Err(self.fail(&event_id, Some(true), e));
            }
        };
        let (status, order_id, detail) = match &outcome {
            IngestOutcome::Processed { order_id, .. } => {
                (NotificationOutcome::Processed, Some(*order_id), None)
            }
            IngestOutcome::TransitionRejected { order_id, reason, .. } => (
                NotificationOutcome::TransitionRejected,
                Some(*order_id),
                Some(reason.clone()),
            ),
            IngestOutcome::NoMatchingOrder { .. } => (NotificationOutcome::NoMatchingOrder, None, None),
            _ => (NotificationOutcome::Ignored, None, None),
        };
        self.finish(&event_id, Some(true), status, order_id, detail)?;

        // ── Step 6: Ledger ───────────────────────────────────────────────────
        if let Some(order_id) = order_id {
            let event = EventKind::NotificationProcessed {
                provider_event_id: event_id.clone(),
                provider_event_type: envelope.event_type.clone(),
                outcome: status.as_str().to_string(),
            };
            // The transition is committed; a retry would only see it as
            // rejected, so the row keeps its outcome and notes the gap.
            let appended =
                ctx.ledger
                    .append(&order_id, &event, &EventContext::with_external_ref(&event_id));
            if let Err(e) = appended {
                error!(event_id = %event_id, order_id = %order_id, error = %e, "notification event not recorded");
                let note = format!("ledger append failed: {e}");
                if let Err(update) = ctx.notifications.update_notification(&event_id, &mut |row| {
                    row.detail = Some(match row.detail.take() {
                        Some(detail) => format!("{detail}; {note}"),
                        None => note.clone(),
                    });
                }) {
                    error!(event_id = %event_id, error = %update, "notification row not annotated");
                }
            }
        }

        info!(
            event_id = %event_id,
            event_type = %envelope.event_type,
            outcome = outcome.as_str(),
            "notification handled"
        );
        Ok(outcome)
    }

    fn dispatch(&self, envelope: &NotificationEnvelope) -> EvidentiaResult<IngestOutcome> {
        let event_id = envelope.id.clone();
        let known = matches!(
            envelope.event_type.as_str(),
            CAPTURE_COMPLETED | CAPTURE_REFUNDED | CAPTURE_REVERSED | DISPUTE_CREATED
        );
        if !known {
            debug!(event_id = %event_id, event_type = %envelope.event_type, "notification type ignored");
            return Ok(IngestOutcome::Ignored { event_id });
        }

        let Some(order) = self.find_order(envelope)? else {
            warn!(
                event_id = %event_id,
                event_type = %envelope.event_type,
                "notification matches no order"
            );
            return Ok(IngestOutcome::NoMatchingOrder { event_id });
        };

        let ctx = EventContext::with_external_ref(&event_id);
        let result = match envelope.event_type.as_str() {
            CAPTURE_COMPLETED => self
                .machine
                .confirm_payment(&order.id, &event_id, envelope.resource_str("id"), &ctx),
            CAPTURE_REFUNDED => self.machine.refund(&order.id, &event_id, &ctx),
            CAPTURE_REVERSED => self.machine.reverse(&order.id, &event_id, &ctx),
            _ => self.machine.open_dispute(
                &order.id,
                &event_id,
                envelope.resource_str("dispute_id"),
                envelope.resource_str("reason"),
                &ctx,
            ),
        };

        match result {
            Ok(_) => Ok(IngestOutcome::Processed {
                event_id,
                order_id: order.id,
            }),
            Err(EvidentiaError::StateConflict { code, reason }) => {
                warn!(
                    event_id = %event_id,
                    order_id = %order.id,
                    code = %code,
                    "notification transition rejected"
                );
                Ok(IngestOutcome::TransitionRejected {
                    event_id,
                    order_id: order.id,
                    reason: format!("{code}: {reason}"),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn find_order(&self, envelope: &NotificationEnvelope) -> EvidentiaResult<Option<Order>> {
        let store = &self.machine.context().delivery_store;
        for reference in envelope.references() {
            if let Some(order) = store.find_order_by_payment_ref(&reference)? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    fn finish(
        &self,
        event_id: &str,
        signature_valid: Option<bool>,
        outcome: NotificationOutcome,
        order_id: Option<OrderId>,
        detail: Option<String>,
    ) -> EvidentiaResult<()> {
        let ctx = self.machine.context();
        let now = ctx.clock.now();
        ctx.notifications.update_notification(event_id, &mut |row| {
            row.signature_valid = signature_valid;
            row.outcome = outcome;
            row.order_id = order_id;
            row.detail = detail.clone();
            row.processed_at = Some(now);
        })?;
        Ok(())
    }

    /// Mark the row as failed so the provider's retry reprocesses it, and
    /// hand back the error that stopped processing.
    fn fail(&self, event_id: &str, signature_valid: Option<bool>, error: EvidentiaError) -> EvidentiaError {
        let detail = Some(error.to_string());
        if let Err(e) = self.finish(event_id, signature_valid, NotificationOutcome::Failed, None, detail) {
            error!(event_id = %event_id, error = %e, "failed notification not recorded");
        }
        error
    }
}

fn malformed(reason: &str) -> IngestOutcome {
    warn!(reason, "malformed notification rejected");
    IngestOutcome::Malformed {
        reason: reason.to_string(),
    }
}
