//! `POST /redeem/confirm`: buyer side of a manual sale.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use evidentia_core::Redemption;

use crate::error::ApiResult;
use crate::routes::{client_context, json_body};
use crate::state::{blocking, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/redeem/confirm", post(confirm))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub token: String,
    #[serde(default)]
    pub terms_accepted: bool,
    #[serde(default)]
    pub buyer_name: Option<String>,
}

async fn confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<RedeemRequest>, JsonRejection>,
) -> ApiResult<Json<Redemption>> {
    let request = json_body(body)?;
    let client = client_context(&headers, connect.as_ref());
    let machine = state.machine.clone();
    let redemption = blocking(move || {
        machine.redeem(
            &request.token,
            request.terms_accepted,
            request.buyer_name,
            &client,
        )
    })
    .await?;
    Ok(Json(redemption))
}
