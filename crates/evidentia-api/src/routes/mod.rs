//! Route modules and the helpers they share.
//!
//! | Path                          | Module        | Auth     |
//! |-------------------------------|---------------|----------|
//! | `/download/:token`            | [`download`]  | token    |
//! | `/redeem/confirm`             | [`redeem`]    | token    |
//! | `/webhooks/provider`          | [`webhooks`]  | HMAC     |
//! | `/orders/*`, `/manual-sales`  | [`admin`]     | bearer   |

pub mod admin;
pub mod download;
pub mod redeem;
pub mod webhooks;

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap};
use axum::Json;

use evidentia_contracts::EventContext;

use crate::error::{ApiError, ApiResult};

/// Client IP and user agent for ledger events.
///
/// The first `X-Forwarded-For` entry wins over the socket address so the
/// service can sit behind a reverse proxy.
pub(crate) fn client_context(
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
) -> EventContext {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let ip = forwarded.or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(512).collect());
    EventContext {
        ip,
        user_agent,
        external_ref: None,
    }
}

/// Unwrap a JSON body, answering decode failures with the API error shape.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}
