//! Manual sales delivered through one-time redeem links.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use evidentia_contracts::{
    evidence::ManualSale,
    order::{Money, PaymentRefs, ProductSnapshot},
    ConflictCode, EventContext, EventKind, EvidentiaError, EvidentiaResult, OrderId, OrderStatus,
};
use evidentia_crypto::random_token;

use crate::machine::{DeliveryStateMachine, OrderDraft};

/// Operator input for a manual sale.
#[derive(Debug, Clone)]
pub struct NewManualSale {
    pub product: ProductSnapshot,
    pub buyer_email: String,
    /// Overrides the product price, e.g. for a negotiated deal.
    pub amount: Option<Money>,
    /// Overrides the configured per-order download limit.
    pub download_limit: Option<u32>,
}

/// A created sale plus the one-time link to send to the buyer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSale {
    pub sale_id: Uuid,
    pub redeem_url: String,
    /// The raw redeem token. Shown once; only its salted hash is stored.
    pub redeem_token: String,
    pub expires_at: DateTime<Utc>,
}

/// What the buyer receives after redeeming.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub order_id: OrderId,
    pub order_number: String,
    pub download_url: Option<String>,
    pub license_key: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub download_limit: u32,
}

impl DeliveryStateMachine {
    pub fn create_manual_sale(&self, new: NewManualSale, actor: &str) -> EvidentiaResult<CreatedSale> {
        let now = self.ctx.clock.now();
        let raw = random_token(32);
        let expires_at = now + Duration::hours(self.ctx.settings.redeem_link_ttl_hours);
        let amount = new.amount.unwrap_or_else(|| new.product.price.clone());
        if amount.amount_minor < 0 {
            return Err(EvidentiaError::validation("amount must not be negative"));
        }

        let sale = ManualSale {
            id: Uuid::new_v4(),
            link_hash: self.ctx.redeem_hasher.hash(&raw),
            product: new.product,
            buyer_email: new.buyer_email.trim().to_lowercase(),
            amount,
            download_limit: new
                .download_limit
                .unwrap_or(self.ctx.settings.download_limit),
            created_by: actor.to_string(),
            created_at: now,
            expires_at,
            redeemed_at: None,
            order_id: None,
        };
        let sale_id = sale.id;
        self.ctx.sales.insert_sale(sale)?;

        info!(sale_id = %sale_id, actor, "manual sale created");
        Ok(CreatedSale {
            sale_id,
            redeem_url: self.ctx.settings.redeem_url(&raw),
            redeem_token: raw,
            expires_at,
        })
    }

    /// Consume a redeem link and create a paid order with its first link.
    ///
    /// The link is claimed atomically before any order is created, so two
    /// concurrent redemptions of the same link produce one order.
    pub fn redeem(
        &self,
        raw_token: &str,
        terms_accepted: bool,
        buyer_name: Option<String>,
        ctx: &EventContext,
    ) -> EvidentiaResult<Redemption> {
        if !terms_accepted {
            return Err(EvidentiaError::validation("terms must be accepted"));
        }
        let now = self.ctx.clock.now();
        let link_hash = self.ctx.redeem_hasher.hash(raw_token.trim());
        let sale = self
            .ctx
            .sales
            .sale_by_link_hash(&link_hash)?
            .ok_or_else(|| EvidentiaError::not_found("redeem link", "<redacted>"))?;

        // ── Step 1: Claim the link ───────────────────────────────────────────
        let claimed = self.ctx.sales.update_sale(&sale.id, &mut |sale| {
            if sale.redeemed_at.is_some() {
                return Err(EvidentiaError::conflict(
                    ConflictCode::AlreadyRedeemed,
                    "redeem link was already used",
                ));
            }
            if sale.expires_at <= now {
                return Err(EvidentiaError::conflict(
                    ConflictCode::LinkExpired,
                    "redeem link has expired",
                ));
            }
            sale.redeemed_at = Some(now);
            Ok(())
        });
        let sale = match claimed {
            Ok(sale) => sale,
            Err(e) => {
                warn!(sale_id = %sale.id, error = %e, "redeem refused");
                return Err(e);
            }
        };

        // ── Step 2: Create the order as paid ─────────────────────────────────
        let mut product = sale.product.clone();
        product.price = sale.amount.clone();
        let terms_text = product.license_terms.clone().unwrap_or_default();
        let order = self.build_order(
            OrderDraft {
                product,
                buyer_email: sale.buyer_email.clone(),
                buyer_name,
                status: OrderStatus::Pending,
                payment: PaymentRefs {
                    method: "manual".to_string(),
                    provider_order_id: None,
                    capture_id: None,
                },
                download_limit: sale.download_limit,
                source: "manual",
            },
            ctx,
        )?;
        self.ctx.sales.update_sale(&sale.id, &mut |s| {
            s.order_id = Some(order.id);
            Ok(())
        })?;

        // ── Step 3: Terms, payment, license, first link ──────────────────────
        let version = self.ctx.settings.terms_version.clone();
        self.accept_terms(&order.id, &version, &terms_text, ctx)?;
        let grant = self.record_payment_captured(&order.id, None, ctx)?;
        self.ctx
            .ledger
            .append(&order.id, &EventKind::RedeemConfirmed { sale_id: sale.id }, ctx)?;

        info!(sale_id = %sale.id, order_id = %order.id, "manual sale redeemed");
        Ok(Redemption {
            order_id: order.id,
            order_number: grant.order.order_number.clone(),
            download_url: grant.link.as_ref().map(|l| l.download_url.clone()),
            license_key: grant.license_key,
            expires_at: grant.link.map(|l| l.expires_at),
            download_limit: grant.order.download_limit,
        })
    }
}
