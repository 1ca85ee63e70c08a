//! # evidentia-api
//!
//! Axum HTTP surface for Evidentia.
//!
//! ## API surface
//!
//! | Prefix                 | Module                     | Caller            |
//! |------------------------|----------------------------|-------------------|
//! | `/download/*`          | [`routes::download`]       | buyer             |
//! | `/redeem/confirm`      | [`routes::redeem`]         | buyer             |
//! | `/webhooks/provider`   | [`routes::webhooks`]       | payment provider  |
//! | `/orders/*`            | [`routes::admin`]          | operator (bearer) |
//! | `/manual-sales`        | [`routes::admin`]          | operator (bearer) |
//! | `/health/liveness`     | here                       | orchestrator      |
//!
//! ## Middleware (outermost first)
//!
//! ```text
//! TraceLayer → require_admin (operator routes only) → handler
//! ```

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use state::AppState;

/// Largest accepted request body. Evidence attachments arrive base64-encoded.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Assemble the application router.
pub fn app(state: AppState) -> Router {
    let operator = routes::admin::router()
        .route_layer(from_fn_with_state(state.clone(), auth::require_admin));

    let public = Router::new()
        .merge(routes::download::router())
        .merge(routes::redeem::router())
        .merge(routes::webhooks::router())
        .route("/health/liveness", get(liveness));

    Router::new()
        .merge(public)
        .merge(operator)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn liveness() -> &'static str {
    "ok"
}
