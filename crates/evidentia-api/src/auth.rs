//! Bearer-token authentication for operator endpoints.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use evidentia_contracts::EvidentiaError;

use crate::error::ApiError;
use crate::state::AppState;

/// Header naming the operator on whose behalf a privileged call is made.
pub const OPERATOR_HEADER: &str = "x-operator";

/// Reject requests without `Authorization: Bearer <admin token>`.
///
/// The comparison is constant-time in the token contents.
pub async fn require_admin(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    let expected = state.admin_token.as_bytes();
    let ok = !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected));
    if !ok {
        tracing::warn!(path = %request.uri().path(), "operator request rejected");
        return ApiError::from(EvidentiaError::Unauthorized {
            reason: "missing or invalid admin token".to_string(),
        })
        .into_response();
    }
    next.run(request).await
}

/// The operator named in `x-operator`, or `admin`.
pub fn operator(headers: &HeaderMap) -> String {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .unwrap_or("admin")
        .to_string()
}
