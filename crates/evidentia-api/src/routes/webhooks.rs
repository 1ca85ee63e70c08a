//! `POST /webhooks/provider`: payment-provider notifications.
//!
//! The raw body is passed through untouched; the signature covers the exact
//! bytes the provider sent.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;

use evidentia_webhook::SIGNATURE_HEADER;

use crate::error::ApiResult;
use crate::state::{blocking, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/provider", post(provider_notification))
}

async fn provider_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let ingester = state.ingester.clone();
    let outcome = blocking(move || ingester.ingest(&body, signature.as_deref())).await?;

    let status = StatusCode::from_u16(outcome.http_status()).unwrap_or(StatusCode::OK);
    Ok((status, Json(outcome)).into_response())
}
