//! `GET /download/:token`: token-gated file delivery.
//!
//! The gateway decides; this module only turns its decision into HTTP.
//! Bytes are read on the blocking pool and handed to the response body
//! through a small channel, so a slow client applies back-pressure and a
//! disconnect stops the read.

use std::io;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use evidentia_core::{traits::FileChunks, Denial, DenyReason, Fulfillment, GrantedDownload};

use crate::error::{ApiError, ApiResult, ErrorBody};
use crate::routes::client_context;
use crate::state::{blocking, AppState};

/// Chunks buffered between the file reader and the socket.
const STREAM_BUFFER: usize = 4;

pub fn router() -> Router<AppState> {
    Router::new().route("/download/:token", get(download))
}

async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<Response> {
    let client = client_context(&headers, connect.as_ref());
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let gateway = state.gateway.clone();
    let fulfillment =
        blocking(move || gateway.fulfill(&token, range.as_deref(), &client)).await?;

    match fulfillment {
        Fulfillment::Granted(granted) => granted_response(granted),
        Fulfillment::Denied(denial) => Ok(denied_response(denial)),
    }
}

fn granted_response(granted: GrantedDownload) -> ApiResult<Response> {
    let GrantedDownload {
        filename,
        content_type,
        total_size,
        range,
        content_length,
        body,
        ..
    } = granted;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::task::spawn_blocking(move || pump(body, tx));

    let status = if range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_DISPOSITION, content_disposition(&filename))
        .header(header::CACHE_CONTROL, "no-store");
    if let Some(range) = range {
        builder = builder.header(header::CONTENT_RANGE, range.content_range(total_size));
    }
    builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::Internal(format!("failed to build download response: {e}")))
}

/// Move chunks from the file reader into the response channel.
fn pump(body: FileChunks, tx: mpsc::Sender<io::Result<Bytes>>) {
    for chunk in body {
        let item = chunk.map(Bytes::from).map_err(|e| io::Error::other(e.to_string()));
        let failed = item.is_err();
        if tx.blocking_send(item).is_err() {
            debug!("client went away; download stream closed");
            return;
        }
        if failed {
            return;
        }
    }
}

fn denied_response(denial: Denial) -> Response {
    let status = StatusCode::from_u16(denial.reason.http_status())
        .unwrap_or(StatusCode::FORBIDDEN);
    let body = Json(ErrorBody::new(denial.reason.as_str(), denial_message(denial.reason)));
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(total) = denial.total_size {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    response
}

fn denial_message(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::InvalidLink => "This download link is not valid.",
        DenyReason::NotFound => "This download link is not valid.",
        DenyReason::Frozen => "Downloads for this order are on hold.",
        DenyReason::Revoked => "Downloads for this order have been revoked.",
        DenyReason::Expired => "This download link has expired.",
        DenyReason::AlreadyUsed => "This download link has already been used.",
        DenyReason::LimitReached => "The download limit for this order has been reached.",
        DenyReason::StageUnavailable => "This part of the order is not available.",
        DenyReason::NotReleased => "This part of the order has not been released yet.",
        DenyReason::RangeNotSatisfiable => "The requested range is not satisfiable.",
        DenyReason::FileUnavailable => "The file is temporarily unavailable.",
    }
}

/// `attachment; filename="…"` with characters that would break the quoted
/// string replaced.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' | '\r' | '\n' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_quotes_are_neutralised() {
        assert_eq!(
            content_disposition("guide \"final\".pdf"),
            "attachment; filename=\"guide _final_.pdf\""
        );
        assert_eq!(content_disposition("ünï.zip"), "attachment; filename=\"_n_.zip\"");
    }

    #[test]
    fn unsatisfiable_range_carries_total_size() {
        let response = denied_response(Denial {
            reason: DenyReason::RangeNotSatisfiable,
            total_size: Some(1234),
        });
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1234");
    }
}
