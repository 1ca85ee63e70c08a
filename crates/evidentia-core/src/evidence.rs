//! Evidence attachments and privileged purge.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use evidentia_contracts::{
    evidence::EvidenceAttachment, ConflictCode, EventContext, EventKind, EvidentiaError,
    EvidentiaResult, OrderId,
};
use evidentia_crypto::sha256_hex;

use crate::machine::DeliveryStateMachine;

/// An evidence file supplied by an operator.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
    pub note: Option<String>,
}

/// Everything a purge removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub order_id: OrderId,
    pub stages: u64,
    pub tokens: u64,
    pub events: u64,
    pub notifications: u64,
    pub attachments: u64,
}

impl DeliveryStateMachine {
    /// Store an evidence file and link it to the order.
    pub fn attach_evidence(
        &self,
        order_id: &OrderId,
        new: NewAttachment,
        actor: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<EvidenceAttachment> {
        self.order(order_id)?;
        let filename = sanitize_filename(&new.filename);
        if filename.is_empty() {
            return Err(EvidentiaError::validation("attachment filename is empty"));
        }
        if new.content.is_empty() {
            return Err(EvidentiaError::validation("attachment is empty"));
        }

        let id = Uuid::new_v4();
        let file_key = format!("evidence/{order_id}/{id}/{filename}");
        let sha256 = sha256_hex(&new.content);
        self.ctx
            .files
            .upload(&file_key, &new.content, &new.content_type)?;

        let attachment = EvidenceAttachment {
            id,
            order_id: *order_id,
            file_key,
            filename: filename.clone(),
            content_type: new.content_type,
            sha256: sha256.clone(),
            size: new.content.len() as u64,
            uploaded_by: actor.to_string(),
            note: new.note,
            uploaded_at: self.ctx.clock.now(),
        };
        self.ctx.attachments.insert_attachment(attachment.clone())?;

        self.ctx.ledger.append(
            order_id,
            &EventKind::EvidenceAttached {
                attachment_id: id,
                filename,
                sha256,
                uploaded_by: actor.to_string(),
            },
            ctx,
        )?;
        info!(order_id = %order_id, attachment_id = %id, actor, "evidence attached");
        Ok(attachment)
    }

    /// Delete an order and every record that hangs off it.
    ///
    /// Refused while a dispute retention period is running. The ledger
    /// chain goes with the order, so the purge itself is recorded only in
    /// the application log.
    pub fn purge(&self, order_id: &OrderId, actor: &str) -> EvidentiaResult<PurgeSummary> {
        let order = self.order(order_id)?;
        let now = self.ctx.clock.now();
        if let Some(until) = order.retention_expires_at.filter(|until| *until > now) {
            return Err(EvidentiaError::conflict(
                ConflictCode::RetentionActive,
                format!("order must be retained until {}", until.to_rfc3339()),
            ));
        }

        let attachments = self.ctx.attachments.purge_attachments(order_id)?;
        for attachment in &attachments {
            if let Err(e) = self.ctx.files.delete(&attachment.file_key) {
                warn!(
                    order_id = %order_id,
                    file_key = %attachment.file_key,
                    error = %e,
                    "attachment file could not be deleted"
                );
            }
        }
        let notifications = self.ctx.notifications.purge_notifications(order_id)?;
        let counts = self.ctx.delivery_store.purge_order(order_id)?;
        let events = self.ctx.ledger.purge(order_id)?;

        let summary = PurgeSummary {
            order_id: *order_id,
            stages: counts.stages,
            tokens: counts.tokens,
            events,
            notifications,
            attachments: attachments.len() as u64,
        };
        warn!(
            order_id = %order_id,
            order_number = %order.order_number,
            actor,
            events,
            "order purged"
        );
        Ok(summary)
    }
}

/// Keep only the final path component and drop control characters.
fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}
