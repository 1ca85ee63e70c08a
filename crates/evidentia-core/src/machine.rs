//! The delivery state machine.
//!
//! Every change to an order's status, a stage's status or the freeze
//! overlay goes through `DeliveryStateMachine`. HTTP routes and the
//! notification ingester call these operations and never touch status
//! fields themselves.
//!
//! Each operation follows the same shape:
//!
//!   load → check (atomically, inside the store) → mutate → ledger → side effects
//!
//! Side effects (mail) run last and never undo a committed change.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use evidentia_contracts::{
    order::{
        BuyerContact, FreezeRecord, Money, OrderSnapshot, PaymentRefs, ProductSnapshot,
        TermsAcceptance,
    },
    token::{hash_prefix, DownloadToken},
    ConflictCode, DeliveryStage, EventContext, EventKind, EvidentiaError, EvidentiaResult, Order,
    OrderId, OrderStatus, StageId, StageStatus,
};
use evidentia_crypto::{canonical_sha256, license_key, mask_ip, order_suffix, sha256_hex};

use crate::{context::CoreContext, traits::OutgoingMail};

/// Checkout input for a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub product: ProductSnapshot,
    pub buyer_email: String,
    pub buyer_name: Option<String>,
    pub provider_order_id: Option<String>,
}

/// A download link handed to a buyer.
///
/// `download_url` embeds the raw token; it is returned to the caller and
/// mailed, never logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedLink {
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
    pub token_hash_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<StageId>,
}

/// Result of recording a captured payment.
#[derive(Debug, Clone)]
pub struct PaymentGrant {
    pub order: Order,
    pub license_key: String,
    /// `None` for staged orders, whose links come with each stage release,
    /// and for orders frozen at capture.
    pub link: Option<IssuedLink>,
}

/// Result of releasing a stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRelease {
    pub success: bool,
    pub download_url: String,
    pub stage: DeliveryStage,
}

/// Inputs shared by checkout and redemption when building an order.
pub(crate) struct OrderDraft {
    pub product: ProductSnapshot,
    pub buyer_email: String,
    pub buyer_name: Option<String>,
    pub status: OrderStatus,
    pub payment: PaymentRefs,
    pub download_limit: u32,
    pub source: &'static str,
}

/// Drives orders and stages through their allowed transitions.
#[derive(Clone)]
pub struct DeliveryStateMachine {
    pub(crate) ctx: CoreContext,
}

impl DeliveryStateMachine {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    /// Load an order or fail with `NotFound`.
    pub fn order(&self, order_id: &OrderId) -> EvidentiaResult<Order> {
        self.ctx
            .delivery_store
            .order(order_id)?
            .ok_or_else(|| EvidentiaError::not_found("order", order_id))
    }

    pub fn stages(&self, order_id: &OrderId) -> EvidentiaResult<Vec<DeliveryStage>> {
        self.ctx.delivery_store.stages_for_order(order_id)
    }

    // ── Order creation ────────────────────────────────────────────────────────

    /// Create a pending order from a checkout.
    pub fn create_order(&self, new: NewOrder, ctx: &EventContext) -> EvidentiaResult<Order> {
        let payment = PaymentRefs {
            method: "provider".to_string(),
            provider_order_id: new.provider_order_id,
            capture_id: None,
        };
        self.build_order(
            OrderDraft {
                product: new.product,
                buyer_email: new.buyer_email,
                buyer_name: new.buyer_name,
                status: OrderStatus::Pending,
                payment,
                download_limit: self.ctx.settings.download_limit,
                source: "checkout",
            },
            ctx,
        )
    }

    pub(crate) fn build_order(&self, draft: OrderDraft, ctx: &EventContext) -> EvidentiaResult<Order> {
        validate_email(&draft.buyer_email)?;
        validate_product(&draft.product)?;

        let now = self.ctx.clock.now();
        let content_hash = canonical_sha256(&draft.product)
            .map_err(|e| EvidentiaError::validation(format!("product snapshot not hashable: {e}")))?;
        let order_id = OrderId::new();
        let order_number = format!("EV-{}-{}", now.format("%Y%m%d"), order_suffix());

        let (ip_masked, ip_encrypted) = match ctx.ip.as_deref() {
            Some(ip) => (Some(mask_ip(ip)), Some(self.ctx.cipher.encrypt_str(ip)?)),
            None => (None, None),
        };

        let stages: Vec<DeliveryStage> = if draft.product.staged {
            draft
                .product
                .stages
                .iter()
                .map(|plan| DeliveryStage {
                    id: StageId::new(),
                    order_id,
                    stage_order: plan.stage_order,
                    stage_type: plan.stage_type.clone(),
                    status: StageStatus::Pending,
                    file: plan.file.clone(),
                    download_count: 0,
                    download_limit: plan
                        .download_limit
                        .unwrap_or(self.ctx.settings.stage_download_limit),
                    released_at: None,
                    released_by: None,
                    revoked_at: None,
                    created_at: now,
                })
                .collect()
        } else {
            Vec::new()
        };

        let order = Order {
            id: order_id,
            order_number: order_number.clone(),
            product_id: draft.product.product_id.clone(),
            buyer: BuyerContact {
                email: draft.buyer_email.trim().to_lowercase(),
                name: draft.buyer_name,
                ip_masked,
                ip_encrypted,
                user_agent: ctx.user_agent.clone(),
            },
            amount: draft.product.price.clone(),
            status: draft.status,
            payment: draft.payment,
            download_count: 0,
            download_limit: draft.download_limit,
            download_expires_at: None,
            downloads_revoked: false,
            freeze: None,
            retention_expires_at: None,
            terms: None,
            license_key: None,
            delivery_package: None,
            staged: draft.product.staged,
            snapshot: OrderSnapshot {
                product: draft.product,
                content_hash: content_hash.clone(),
                captured_at: now,
            },
            created_at: now,
            updated_at: now,
        };

        self.ctx
            .delivery_store
            .insert_order(order.clone(), stages)?;

        self.ctx.ledger.append(
            &order.id,
            &EventKind::OrderCreated {
                order_number,
                product_id: order.product_id.clone(),
                buyer_email: order.buyer.email.clone(),
                amount_minor: order.amount.amount_minor,
                currency: order.amount.currency.clone(),
                snapshot_hash: content_hash,
                source: draft.source.to_string(),
            },
            ctx,
        )?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            source = draft.source,
            staged = order.staged,
            "order created"
        );
        Ok(order)
    }

    /// Record that the buyer accepted the license terms shown to them.
    pub fn accept_terms(
        &self,
        order_id: &OrderId,
        version: &str,
        terms_text: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let now = self.ctx.clock.now();
        let acceptance = TermsAcceptance {
            version: version.to_string(),
            terms_hash: sha256_hex(terms_text.as_bytes()),
            ip_masked: ctx.ip.as_deref().map(mask_ip),
            accepted_at: now,
        };

        let order = self.ctx.delivery_store.update_order(order_id, &mut |order| {
            if order.terms.is_some() {
                return Err(EvidentiaError::Duplicate {
                    entity: "terms acceptance",
                    key: order.id.to_string(),
                });
            }
            order.terms = Some(acceptance.clone());
            order.updated_at = now;
            Ok(())
        })?;

        self.ctx.ledger.append(
            order_id,
            &EventKind::TermsAccepted {
                version: acceptance.version.clone(),
                terms_hash: acceptance.terms_hash.clone(),
            },
            ctx,
        )?;
        debug!(order_id = %order_id, version, "terms accepted");
        Ok(order)
    }

    // ── Payment transitions ───────────────────────────────────────────────────

    /// `pending → paid`: assign the license key, open the download window
    /// and, for unstaged orders, issue and mail the first download link.
    pub fn record_payment_captured(
        &self,
        order_id: &OrderId,
        capture_id: Option<String>,
        ctx: &EventContext,
    ) -> EvidentiaResult<PaymentGrant> {
        let now = self.ctx.clock.now();
        let window_days = self.ctx.settings.download_window_days;
        let new_key = license_key();

        let order = self.transition(order_id, OrderStatus::Paid, &mut |order| {
            if capture_id.is_some() {
                order.payment.capture_id = capture_id.clone();
            }
            if order.license_key.is_none() {
                order.license_key = Some(new_key.clone());
            }
            if window_days > 0 {
                order.download_expires_at = Some(now + Duration::days(window_days));
            }
        })?;
        let license = order.license_key.clone().unwrap_or(new_key);

        self.ctx.ledger.append(
            order_id,
            &EventKind::PaymentCaptured {
                method: order.payment.method.clone(),
                capture_id: order.payment.capture_id.clone(),
                amount_minor: order.amount.amount_minor,
                currency: order.amount.currency.clone(),
            },
            ctx,
        )?;
        self.ctx.ledger.append(
            order_id,
            &EventKind::LicenseCreated {
                license_key: license.clone(),
            },
            ctx,
        )?;

        // A frozen order gets its link from an operator re-issue after
        // unfreeze; staged orders get theirs per stage.
        let link = if order.staged || order.is_frozen() {
            None
        } else {
            match self.mint_link(&order, None, "checkout", ctx) {
                Ok(link) => Some(link),
                Err(EvidentiaError::StateConflict {
                    code: ConflictCode::Frozen,
                    ..
                }) => None,
                Err(e) => return Err(e),
            }
        };
        if link.is_none() && !order.staged {
            info!(order_id = %order_id, "order is frozen; no download link issued at capture");
        }

        match &link {
            Some(link) => self.send_mail(
                &order,
                "download_ready",
                json!({
                    "order_number": order.order_number,
                    "download_url": link.download_url,
                    "license_key": license,
                    "expires_at": link.expires_at,
                }),
            ),
            None => self.send_mail(
                &order,
                "order_confirmed",
                json!({
                    "order_number": order.order_number,
                    "license_key": license,
                }),
            ),
        };

        Ok(PaymentGrant {
            order,
            license_key: license,
            link,
        })
    }

    /// `paid → confirmed` after the provider reports the capture complete.
    pub fn confirm_payment(
        &self,
        order_id: &OrderId,
        provider_event_id: &str,
        capture_id: Option<String>,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let order = self.transition(order_id, OrderStatus::Confirmed, &mut |order| {
            if order.payment.capture_id.is_none() {
                order.payment.capture_id = capture_id.clone();
            }
        })?;
        self.ctx.ledger.append(
            order_id,
            &EventKind::PaymentConfirmed {
                provider_event_id: provider_event_id.to_string(),
                capture_id,
            },
            ctx,
        )?;
        Ok(order)
    }

    /// Move to `refunded` and revoke downloads.
    pub fn refund(
        &self,
        order_id: &OrderId,
        provider_event_id: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let order = self.transition(order_id, OrderStatus::Refunded, &mut |order| {
            order.downloads_revoked = true;
        })?;
        self.ctx.ledger.append(
            order_id,
            &EventKind::PaymentRefunded {
                provider_event_id: provider_event_id.to_string(),
            },
            ctx,
        )?;
        Ok(order)
    }

    /// Move to `refunded` after a payment reversal and revoke downloads.
    pub fn reverse(
        &self,
        order_id: &OrderId,
        provider_event_id: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let order = self.transition(order_id, OrderStatus::Refunded, &mut |order| {
            order.downloads_revoked = true;
        })?;
        self.ctx.ledger.append(
            order_id,
            &EventKind::PaymentReversed {
                provider_event_id: provider_event_id.to_string(),
            },
            ctx,
        )?;
        Ok(order)
    }

    pub fn open_dispute(
        &self,
        order_id: &OrderId,
        provider_event_id: &str,
        dispute_id: Option<String>,
        reason: Option<String>,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let order = self.transition(order_id, OrderStatus::Disputed, &mut |_| {})?;
        self.ctx.ledger.append(
            order_id,
            &EventKind::DisputeCreated {
                provider_event_id: provider_event_id.to_string(),
                dispute_id,
                reason,
            },
            ctx,
        )?;
        Ok(order)
    }

    /// Apply a payment transition from the order's payment status.
    ///
    /// While the order is frozen the status stays `frozen` and the new
    /// status becomes the one restored on unfreeze.
    fn transition(
        &self,
        order_id: &OrderId,
        next: OrderStatus,
        mutate: &mut dyn FnMut(&mut Order),
    ) -> EvidentiaResult<Order> {
        let now = self.ctx.clock.now();
        let mut from = None;
        let order = self.ctx.delivery_store.update_order(order_id, &mut |order| {
            let current = order.payment_status();
            if !current.can_transition_to(next) {
                return Err(EvidentiaError::conflict(
                    ConflictCode::InvalidTransition,
                    format!("order cannot move from {current} to {next}"),
                ));
            }
            from = Some(current);
            match order.freeze.as_mut() {
                Some(record) => record.status_before = next,
                None => order.status = next,
            }
            mutate(order);
            order.updated_at = now;
            Ok(())
        })?;

        info!(
            order_id = %order_id,
            from = ?from,
            to = %next,
            frozen = order.is_frozen(),
            "order status changed"
        );
        Ok(order)
    }

    // ── Freeze overlay and revocation ─────────────────────────────────────────

    /// Freeze the order for a dispute: halts every delivery path and starts
    /// the retention period.
    pub fn freeze(
        &self,
        order_id: &OrderId,
        actor: &str,
        reason: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let now = self.ctx.clock.now();
        let retention_until = now + Duration::days(self.ctx.settings.retention_days);

        let order = self.ctx.delivery_store.update_order(order_id, &mut |order| {
            if order.is_frozen() {
                return Err(EvidentiaError::conflict(
                    ConflictCode::Frozen,
                    "order is already frozen",
                ));
            }
            order.freeze = Some(FreezeRecord {
                frozen_at: now,
                frozen_by: actor.to_string(),
                reason: reason.to_string(),
                status_before: order.status,
            });
            order.status = OrderStatus::Frozen;
            order.retention_expires_at = Some(retention_until);
            order.updated_at = now;
            Ok(())
        })?;

        let status_before = order
            .freeze
            .as_ref()
            .map(|r| r.status_before)
            .unwrap_or(OrderStatus::Frozen);
        self.ctx.ledger.append(
            order_id,
            &EventKind::OrderFrozen {
                frozen_by: actor.to_string(),
                reason: reason.to_string(),
                status_before: status_before.to_string(),
                retention_expires_at: retention_until,
            },
            ctx,
        )?;

        warn!(
            order_id = %order_id,
            actor,
            status_before = %status_before,
            "order frozen for dispute"
        );
        Ok(order)
    }

    /// Lift the freeze and restore the status recorded when it was applied.
    pub fn unfreeze(&self, order_id: &OrderId, actor: &str, ctx: &EventContext) -> EvidentiaResult<Order> {
        let now = self.ctx.clock.now();
        let order = self.ctx.delivery_store.update_order(order_id, &mut |order| {
            let Some(record) = order.freeze.take() else {
                return Err(EvidentiaError::conflict(
                    ConflictCode::NotFrozen,
                    "order is not frozen",
                ));
            };
            order.status = record.status_before;
            order.updated_at = now;
            Ok(())
        })?;

        self.ctx.ledger.append(
            order_id,
            &EventKind::OrderUnfrozen {
                unfrozen_by: actor.to_string(),
                restored_status: order.status.to_string(),
            },
            ctx,
        )?;
        info!(order_id = %order_id, actor, restored = %order.status, "order unfrozen");
        Ok(order)
    }

    /// Permanently block every download of the order.
    pub fn revoke_downloads(
        &self,
        order_id: &OrderId,
        actor: &str,
        reason: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<Order> {
        let now = self.ctx.clock.now();
        let order = self.ctx.delivery_store.update_order(order_id, &mut |order| {
            if order.downloads_revoked {
                return Err(EvidentiaError::conflict(
                    ConflictCode::DownloadsRevoked,
                    "downloads are already revoked",
                ));
            }
            order.downloads_revoked = true;
            order.updated_at = now;
            Ok(())
        })?;

        self.ctx.ledger.append(
            order_id,
            &EventKind::DownloadsRevoked {
                revoked_by: actor.to_string(),
                reason: reason.to_string(),
            },
            ctx,
        )?;
        warn!(order_id = %order_id, actor, "downloads revoked");
        Ok(order)
    }

    // ── Stages ────────────────────────────────────────────────────────────────

    /// `pending → ready` for one stage, then mint and mail its link.
    pub fn release_stage(
        &self,
        order_id: &OrderId,
        stage_id: &StageId,
        actor: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<StageRelease> {
        let now = self.ctx.clock.now();

        // ── Step 1: Atomic check and transition ──────────────────────────────
        let stage = self.ctx.delivery_store.update_stage(stage_id, &mut |order, stage| {
            if stage.order_id != *order_id {
                return Err(EvidentiaError::not_found("stage", stage_id));
            }
            if order.is_frozen() {
                return Err(EvidentiaError::conflict(
                    ConflictCode::Frozen,
                    "order is frozen; stage release is blocked",
                ));
            }
            match stage.status {
                StageStatus::Pending => {}
                StageStatus::Revoked => {
                    return Err(EvidentiaError::conflict(
                        ConflictCode::StageRevoked,
                        "stage has been revoked",
                    ))
                }
                StageStatus::Ready | StageStatus::Delivered => {
                    return Err(EvidentiaError::conflict(
                        ConflictCode::AlreadyReleased,
                        format!("stage is already {}", stage.status),
                    ))
                }
            }
            if !order.status.is_paid() {
                return Err(EvidentiaError::conflict(
                    ConflictCode::NotPaid,
                    format!("order is {}, release requires paid", order.status),
                ));
            }
            stage.status = StageStatus::Ready;
            stage.released_at = Some(now);
            stage.released_by = Some(actor.to_string());
            Ok(())
        });
        let stage = match stage {
            Ok(stage) => stage,
            Err(e) => {
                warn!(order_id = %order_id, stage_id = %stage_id, error = %e, "stage release refused");
                return Err(e);
            }
        };

        // ── Step 2: Ledger ───────────────────────────────────────────────────
        self.ctx.ledger.append(
            order_id,
            &EventKind::StageReleased {
                stage_id: stage.id,
                stage_order: stage.stage_order,
                stage_type: stage.stage_type.clone(),
                file_key: stage.file.key.clone(),
                file_sha256: stage.file.sha256.clone(),
                released_by: actor.to_string(),
            },
            ctx,
        )?;
        info!(
            order_id = %order_id,
            stage_id = %stage_id,
            stage_order = stage.stage_order,
            actor,
            "stage released"
        );

        // ── Step 3: Stage-scoped token ───────────────────────────────────────
        let order = self.order(order_id)?;
        let link = self.mint_link(&order, Some(&stage), "stage_release", ctx)?;

        // ── Step 4: Notify the buyer (best effort) ───────────────────────────
        self.send_mail(
            &order,
            "stage_released",
            json!({
                "order_number": order.order_number,
                "stage_order": stage.stage_order,
                "stage_type": stage.stage_type,
                "download_url": link.download_url,
                "expires_at": link.expires_at,
            }),
        );

        Ok(StageRelease {
            success: true,
            download_url: link.download_url,
            stage,
        })
    }

    /// Move a stage to the terminal `revoked` status.
    pub fn revoke_stage(
        &self,
        order_id: &OrderId,
        stage_id: &StageId,
        actor: &str,
        reason: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<DeliveryStage> {
        let now = self.ctx.clock.now();
        let stage = self.ctx.delivery_store.update_stage(stage_id, &mut |_, stage| {
            if stage.order_id != *order_id {
                return Err(EvidentiaError::not_found("stage", stage_id));
            }
            if stage.status == StageStatus::Revoked {
                return Err(EvidentiaError::conflict(
                    ConflictCode::StageRevoked,
                    "stage is already revoked",
                ));
            }
            stage.status = StageStatus::Revoked;
            stage.revoked_at = Some(now);
            Ok(())
        })?;

        self.ctx.ledger.append(
            order_id,
            &EventKind::StageRevoked {
                stage_id: *stage_id,
                revoked_by: actor.to_string(),
                reason: reason.to_string(),
            },
            ctx,
        )?;
        warn!(order_id = %order_id, stage_id = %stage_id, actor, "stage revoked");
        Ok(stage)
    }

    // ── Download links ────────────────────────────────────────────────────────

    /// Operator re-issue of a download link.
    pub fn issue_download_link(
        &self,
        order_id: &OrderId,
        stage_id: Option<&StageId>,
        actor: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<IssuedLink> {
        let order = self.order(order_id)?;
        if order.is_frozen() {
            return Err(EvidentiaError::conflict(
                ConflictCode::Frozen,
                "order is frozen; no links may be issued",
            ));
        }
        if order.downloads_revoked || order.status == OrderStatus::Revoked {
            return Err(EvidentiaError::conflict(
                ConflictCode::DownloadsRevoked,
                "downloads are revoked for this order",
            ));
        }
        if !order.status.is_paid() {
            return Err(EvidentiaError::conflict(
                ConflictCode::NotPaid,
                format!("order is {}", order.status),
            ));
        }

        let stage = match stage_id {
            Some(id) => {
                let stage = self
                    .ctx
                    .delivery_store
                    .stage(id)?
                    .filter(|s| s.order_id == *order_id)
                    .ok_or_else(|| EvidentiaError::not_found("stage", id))?;
                match stage.status {
                    StageStatus::Revoked => {
                        return Err(EvidentiaError::conflict(
                            ConflictCode::StageRevoked,
                            "stage has been revoked",
                        ))
                    }
                    StageStatus::Pending => {
                        return Err(EvidentiaError::conflict(
                            ConflictCode::NotReleased,
                            "stage has not been released",
                        ))
                    }
                    StageStatus::Ready | StageStatus::Delivered => Some(stage),
                }
            }
            None if order.staged => {
                return Err(EvidentiaError::validation(
                    "staged orders are delivered per stage; a stage id is required",
                ))
            }
            None => None,
        };

        let link = self.mint_link(&order, stage.as_ref(), "reissue", ctx)?;
        info!(
            order_id = %order_id,
            actor,
            token_hash_prefix = %link.token_hash_prefix,
            "download link re-issued"
        );
        self.send_mail(
            &order,
            "download_reissued",
            json!({
                "order_number": order.order_number,
                "download_url": link.download_url,
                "expires_at": link.expires_at,
            }),
        );
        Ok(link)
    }

    /// Mint a token, persist its hash and record `token.issued`.
    ///
    /// Every issuance path ends here. The freeze, revocation and stage
    /// checks run inside the store's atomic insert, so no token row can be
    /// written for an order that is frozen or revoked at that moment.
    pub(crate) fn mint_link(
        &self,
        order: &Order,
        stage: Option<&DeliveryStage>,
        reason: &str,
        ctx: &EventContext,
    ) -> EvidentiaResult<IssuedLink> {
        let now = self.ctx.clock.now();
        let issued = self.ctx.signer.issue(
            order.id.0,
            stage.map(|s| s.id.0),
            self.ctx.settings.token_ttl(),
            now,
        );
        let stage_id = stage.map(|s| s.id);

        let token = DownloadToken {
            token_hash: issued.token_hash.clone(),
            order_id: order.id,
            stage_id,
            expires_at: issued.expires_at,
            single_use: true,
            used_at: None,
            issued_at: now,
            reason: reason.to_string(),
        };
        if let Err(e) = self
            .ctx
            .delivery_store
            .insert_token(token, &mut |order, stage| admit_issuance(order, stage))
        {
            warn!(order_id = %order.id, reason, error = %e, "download link not issued");
            return Err(e);
        }

        let prefix = hash_prefix(&issued.token_hash).to_string();
        self.ctx.ledger.append(
            &order.id,
            &EventKind::TokenIssued {
                token_hash_prefix: prefix.clone(),
                stage_id,
                expires_at: issued.expires_at,
                reason: reason.to_string(),
            },
            ctx,
        )?;

        Ok(IssuedLink {
            download_url: self.ctx.settings.download_url(&issued.raw_token),
            expires_at: issued.expires_at,
            token_hash_prefix: prefix,
            stage_id,
        })
    }

    // ── Mail ──────────────────────────────────────────────────────────────────

    /// Send a message with bounded retries and record the outcome.
    ///
    /// Never fails: a mail outage must not block or reverse a delivery.
    pub(crate) fn send_mail(
        &self,
        order: &Order,
        template: &str,
        data: serde_json::Value,
    ) -> Option<String> {
        let mail = OutgoingMail {
            template: template.to_string(),
            recipient: order.buyer.email.clone(),
            data,
        };
        let attempts = self.ctx.settings.mail_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.ctx.mailer.send(&mail) {
                Ok(message_id) => {
                    let event = EventKind::EmailSent {
                        template: template.to_string(),
                        message_id: message_id.clone(),
                    };
                    if let Err(e) = self.ctx.ledger.append(&order.id, &event, &EventContext::system()) {
                        error!(order_id = %order.id, error = %e, "failed to record email.sent");
                    }
                    debug!(order_id = %order.id, template, attempt, "mail sent");
                    return Some(message_id);
                }
                Err(e) => {
                    warn!(order_id = %order.id, template, attempt, error = %e, "mail attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        let event = EventKind::EmailFailed {
            template: template.to_string(),
            error: last_error,
            attempts,
        };
        if let Err(e) = self.ctx.ledger.append(&order.id, &event, &EventContext::system()) {
            error!(order_id = %order.id, error = %e, "failed to record email.failed");
        }
        None
    }
}

/// Whether a new token may be written for `order` (and `stage`).
fn admit_issuance(order: &Order, stage: Option<&DeliveryStage>) -> EvidentiaResult<()> {
    if order.is_frozen() {
        return Err(EvidentiaError::conflict(
            ConflictCode::Frozen,
            "order is frozen; no links may be issued",
        ));
    }
    if order.downloads_revoked || order.status == OrderStatus::Revoked {
        return Err(EvidentiaError::conflict(
            ConflictCode::DownloadsRevoked,
            "downloads are revoked for this order",
        ));
    }
    match stage.map(|s| s.status) {
        Some(StageStatus::Revoked) => Err(EvidentiaError::conflict(
            ConflictCode::StageRevoked,
            "stage has been revoked",
        )),
        Some(StageStatus::Pending) => Err(EvidentiaError::conflict(
            ConflictCode::NotReleased,
            "stage has not been released",
        )),
        _ => Ok(()),
    }
}

fn validate_email(email: &str) -> EvidentiaResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(EvidentiaError::validation("buyer email is not a valid address")),
    }
}

fn validate_product(product: &ProductSnapshot) -> EvidentiaResult<()> {
    let Money { amount_minor, .. } = &product.price;
    if *amount_minor < 0 {
        return Err(EvidentiaError::validation("price must not be negative"));
    }
    if product.staged && product.stages.is_empty() {
        return Err(EvidentiaError::validation("staged product has no stages"));
    }
    if !product.staged && product.files.is_empty() {
        return Err(EvidentiaError::validation("product has no files to deliver"));
    }
    Ok(())
}
