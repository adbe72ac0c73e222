use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;
use crate::store::backend::BackendError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A versioned write lost to a concurrent one. Safe to retry.
    #[error("stale write: {0}")]
    StaleWrite(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("operation already in progress for {0}")]
    Busy(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short label used as the `outcome` metric value.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Precondition(_) => "precondition",
            AppError::Conflict(_) => "conflict",
            AppError::StaleWrite(_) => "stale_write",
            AppError::Forbidden(_) => "forbidden",
            AppError::Busy(_) => "busy",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Upstream(_) => "upstream",
            AppError::Unavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Conflict { .. } => AppError::StaleWrite(err.to_string()),
            StoreError::AlreadyExists { .. } => AppError::Conflict(err.to_string()),
            StoreError::Unavailable(msg) => AppError::Unavailable(msg),
            StoreError::Serialization(msg) => AppError::Internal(msg),
        }
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Precondition(msg) => (StatusCode::PRECONDITION_FAILED, msg.clone()),
            AppError::Conflict(msg) | AppError::StaleWrite(msg) => {
                (StatusCode::CONFLICT, msg.clone())
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Busy(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
