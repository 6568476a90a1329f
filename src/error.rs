//! Service-wide error type and its HTTP/WS representation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("insufficient shares")]
    InsufficientShares,

    #[error("insufficient short position")]
    InsufficientShortPosition,

    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("match is not in a tradeable state")]
    InvalidMatchState,

    #[error("user is not a participant in this match")]
    NotParticipant,

    #[error("trade symbol does not match match symbol")]
    SymbolMismatch,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("transient storage error, retry")]
    TransientStorage(#[source] anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorEnvelope {
    timestamp: String,
    status: u16,
    error: &'static str,
    message: String,
    path: Option<String>,
    details: Option<serde_json::Value>,
}

impl AppError {
    fn status_and_label(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::InsufficientFunds => (StatusCode::BAD_REQUEST, "insufficient_funds"),
            AppError::InsufficientShares => (StatusCode::BAD_REQUEST, "insufficient_shares"),
            AppError::InsufficientShortPosition => {
                (StatusCode::BAD_REQUEST, "insufficient_short_position")
            }
            AppError::InvalidQuantity => (StatusCode::BAD_REQUEST, "invalid_quantity"),
            AppError::InvalidMatchState => (StatusCode::CONFLICT, "invalid_match_state"),
            AppError::NotParticipant => (StatusCode::FORBIDDEN, "not_participant"),
            AppError::SymbolMismatch => (StatusCode::BAD_REQUEST, "symbol_mismatch"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            AppError::TransientStorage(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient_storage"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, label) = self.status_and_label();

        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE) {
            tracing::error!(error = %self, "request failed");
            metrics::counter!("candleduel_internal_errors_total").increment(1);
        }

        let body = ErrorEnvelope {
            timestamp: Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: label,
            message: self.to_string(),
            path: None,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}
