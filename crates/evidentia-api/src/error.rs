//! # API error type
//!
//! Maps [`EvidentiaError`] to HTTP status codes and a JSON body
//! `{"error": {"code", "message"}}`. Storage, crypto and configuration
//! failures are logged and answered with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use evidentia_contracts::{ConflictCode, EvidentiaError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `not_found` or a conflict code such as
    /// `frozen`.
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    Domain(EvidentiaError),
    /// The request body could not be decoded.
    BadRequest(String),
    /// A blocking task panicked or was cancelled.
    Internal(String),
}

impl From<EvidentiaError> for ApiError {
    fn from(err: EvidentiaError) -> Self {
        Self::Domain(err)
    }
}

impl ApiError {
    /// Status code and machine-readable code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        let err = match self {
            Self::BadRequest(_) => return (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Internal(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Domain(err) => err,
        };
        match err {
            EvidentiaError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            EvidentiaError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            EvidentiaError::Integrity { .. } => (StatusCode::CONFLICT, "integrity_violation"),
            EvidentiaError::StateConflict { code, .. } => (conflict_status(*code), code.as_str()),
            EvidentiaError::SequenceConflict { .. } => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            EvidentiaError::Duplicate { .. } => (StatusCode::CONFLICT, "duplicate"),
            EvidentiaError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
            EvidentiaError::External { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            EvidentiaError::Crypto { .. }
            | EvidentiaError::Storage { .. }
            | EvidentiaError::ConfigError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

fn conflict_status(code: ConflictCode) -> StatusCode {
    match code {
        ConflictCode::Frozen | ConflictCode::DownloadsRevoked | ConflictCode::StageRevoked => {
            StatusCode::FORBIDDEN
        }
        ConflictCode::LinkExpired => StatusCode::GONE,
        _ => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            match &self {
                Self::Domain(EvidentiaError::External { service, .. }) => {
                    tracing::error!(service = *service, error = ?self, "upstream failure");
                    format!("{service} is unavailable")
                }
                Self::Domain(EvidentiaError::SequenceConflict { .. }) => {
                    tracing::warn!(error = ?self, "ledger contention");
                    "try again".to_string()
                }
                _ => {
                    tracing::error!(error = ?self, "internal server error");
                    "an internal error occurred".to_string()
                }
            }
        } else {
            match self {
                Self::Domain(err) => err.to_string(),
                Self::BadRequest(reason) => reason,
                Self::Internal(_) => "an internal error occurred".to_string(),
            }
        };

        (status, Json(ErrorBody::new(code, message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_codes_become_response_codes() {
        let err = ApiError::from(EvidentiaError::conflict(ConflictCode::Frozen, "order is frozen"));
        assert_eq!(err.status_and_code(), (StatusCode::FORBIDDEN, "frozen"));

        let err = ApiError::from(EvidentiaError::conflict(ConflictCode::AlreadyReleased, "again"));
        assert_eq!(err.status_and_code(), (StatusCode::CONFLICT, "already_released"));
    }

    #[test]
    fn storage_failures_are_internal() {
        let err = ApiError::from(EvidentiaError::storage("disk full at /var/lib/evidentia"));
        assert_eq!(
            err.status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::from(EvidentiaError::not_found("order", "123"));
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, "not_found"));
    }
}
