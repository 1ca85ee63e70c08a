//! Operator endpoints. Mounted behind [`require_admin`](crate::auth::require_admin).
//!
//! - `GET    /orders/:id`                              order status
//! - `DELETE /orders/:id`                              purge
//! - `POST   /orders/:id/freeze`                       dispute freeze
//! - `POST   /orders/:id/unfreeze`
//! - `POST   /orders/:id/revoke-downloads`
//! - `POST   /orders/:id/download-links`               re-issue a link
//! - `POST   /orders/:id/stages/:stage_id/release`
//! - `POST   /orders/:id/stages/:stage_id/revoke`
//! - `GET    /orders/:id/verify-chain`
//! - `POST   /orders/:id/reseal-chain`
//! - `GET    /orders/:id/evidence`                     evidence report
//! - `POST   /orders/:id/evidence`                     attach a file
//! - `POST   /manual-sales`

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use evidentia_contracts::{
    event::{ChainVerification, ResealOutcome},
    evidence::EvidenceAttachment,
    order::{Money, ProductSnapshot},
    DeliveryStage, EvidentiaError, Order, OrderId, OrderStatus, StageId,
};
use evidentia_core::{
    machine::IssuedLink, CreatedSale, EvidenceReport, NewAttachment, NewManualSale, PurgeSummary,
    StageRelease,
};

use crate::auth::operator;
use crate::error::{ApiError, ApiResult};
use crate::routes::{client_context, json_body};
use crate::state::{blocking, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/:id", get(order_status).delete(purge))
        .route("/orders/:id/freeze", post(freeze))
        .route("/orders/:id/unfreeze", post(unfreeze))
        .route("/orders/:id/revoke-downloads", post(revoke_downloads))
        .route("/orders/:id/download-links", post(reissue_link))
        .route("/orders/:id/stages/:stage_id/release", post(release_stage))
        .route("/orders/:id/stages/:stage_id/revoke", post(revoke_stage))
        .route("/orders/:id/verify-chain", get(verify_chain))
        .route("/orders/:id/reseal-chain", post(reseal_chain))
        .route("/orders/:id/evidence", get(evidence_report).post(attach_evidence))
        .route("/manual-sales", post(create_manual_sale))
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Operator-facing order status.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub frozen: bool,
    pub downloads_revoked: bool,
    pub download_count: u32,
    pub download_limit: u32,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub retention_expires_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            frozen: order.is_frozen(),
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            downloads_revoked: order.downloads_revoked,
            download_count: order.download_count,
            download_limit: order.download_limit,
            download_expires_at: order.download_expires_at,
            retention_expires_at: order.retention_expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReissueRequest {
    #[serde(default)]
    pub stage_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceQuery {
    #[serde(default)]
    pub include_pii: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequest {
    pub filename: String,
    pub content_type: String,
    /// File content, standard base64.
    pub content: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSaleRequest {
    pub product: ProductSnapshot,
    pub buyer_email: String,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub download_limit: Option<u32>,
}

fn reason(request: ReasonRequest) -> ApiResult<String> {
    let reason = request.reason.trim().to_string();
    if reason.is_empty() {
        return Err(EvidentiaError::validation("reason must not be empty").into());
    }
    Ok(reason)
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

async fn order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrderView>> {
    let machine = state.machine.clone();
    let order = blocking(move || machine.order(&OrderId(id))).await?;
    Ok(Json(order.into()))
}

async fn purge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<PurgeSummary>> {
    let actor = operator(&headers);
    let machine = state.machine.clone();
    let summary = blocking(move || machine.purge(&OrderId(id), &actor)).await?;
    Ok(Json(summary))
}

async fn freeze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> ApiResult<Json<OrderView>> {
    let reason = reason(json_body(body)?)?;
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let order = blocking(move || machine.freeze(&OrderId(id), &actor, &reason, &ctx)).await?;
    Ok(Json(order.into()))
}

async fn unfreeze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<Json<OrderView>> {
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let order = blocking(move || machine.unfreeze(&OrderId(id), &actor, &ctx)).await?;
    Ok(Json(order.into()))
}

async fn revoke_downloads(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> ApiResult<Json<OrderView>> {
    let reason = reason(json_body(body)?)?;
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let order =
        blocking(move || machine.revoke_downloads(&OrderId(id), &actor, &reason, &ctx)).await?;
    Ok(Json(order.into()))
}

async fn reissue_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Option<Json<ReissueRequest>>,
) -> ApiResult<Json<IssuedLink>> {
    let stage_id = body.and_then(|Json(r)| r.stage_id).map(StageId);
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let link = blocking(move || {
        machine.issue_download_link(&OrderId(id), stage_id.as_ref(), &actor, &ctx)
    })
    .await?;
    Ok(Json(link))
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

async fn release_stage(
    State(state): State<AppState>,
    Path((id, stage_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<Json<StageRelease>> {
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let release = blocking(move || {
        machine.release_stage(&OrderId(id), &StageId(stage_id), &actor, &ctx)
    })
    .await?;
    Ok(Json(release))
}

async fn revoke_stage(
    State(state): State<AppState>,
    Path((id, stage_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> ApiResult<Json<DeliveryStage>> {
    let reason = reason(json_body(body)?)?;
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let stage = blocking(move || {
        machine.revoke_stage(&OrderId(id), &StageId(stage_id), &actor, &reason, &ctx)
    })
    .await?;
    Ok(Json(stage))
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

async fn verify_chain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ChainVerification>> {
    let machine = state.machine.clone();
    let result = blocking(move || {
        let order_id = OrderId(id);
        machine.order(&order_id)?;
        machine.context().ledger.verify(&order_id)
    })
    .await?;
    Ok(Json(result))
}

async fn reseal_chain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<Json<ResealOutcome>> {
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let outcome = blocking(move || {
        let order_id = OrderId(id);
        machine.order(&order_id)?;
        machine.context().ledger.reseal(&order_id, &actor, &ctx)
    })
    .await?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

async fn evidence_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    query: Option<Query<EvidenceQuery>>,
) -> ApiResult<Json<EvidenceReport>> {
    let include_pii = query.map(|Query(q)| q.include_pii).unwrap_or(false);
    let compiler = state.compiler.clone();
    let report = blocking(move || compiler.compile(&OrderId(id), include_pii)).await?;
    Ok(Json(report))
}

async fn attach_evidence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<AttachmentRequest>, JsonRejection>,
) -> ApiResult<Json<EvidenceAttachment>> {
    let request = json_body(body)?;
    let content = base64::engine::general_purpose::STANDARD
        .decode(request.content.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("attachment content is not base64: {e}")))?;
    let attachment = NewAttachment {
        filename: request.filename,
        content_type: request.content_type,
        content,
        note: request.note,
    };
    let actor = operator(&headers);
    let ctx = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let stored =
        blocking(move || machine.attach_evidence(&OrderId(id), attachment, &actor, &ctx)).await?;
    Ok(Json(stored))
}

// ---------------------------------------------------------------------------
// Manual sales
// ---------------------------------------------------------------------------

async fn create_manual_sale(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ManualSaleRequest>, JsonRejection>,
) -> ApiResult<Json<CreatedSale>> {
    let request = json_body(body)?;
    let sale = NewManualSale {
        product: request.product,
        buyer_email: request.buyer_email,
        amount: request.amount,
        download_limit: request.download_limit,
    };
    let actor = operator(&headers);
    let machine = state.machine.clone();
    let created = blocking(move || machine.create_manual_sale(sale, &actor)).await?;
    Ok(Json(created))
}
