use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::errors::GateError;

/// Error returned by the plain-JSON routes as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status();
        (code, Json(ErrBody { error: self.to_string() })).into_response()
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Internal(s)
    }
}

/// Server-side failures are logged by the caller and reported without detail.
impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Config { message } => AppError::BadRequest(message),
            GateError::Serialization { context, .. } => {
                AppError::BadRequest(format!("invalid payload: {context}"))
            }
            GateError::Validation { field, message } => {
                AppError::BadRequest(format!("{field}: {message}"))
            }
            GateError::Auth { message } => AppError::Unauthorized(message),
            GateError::NotFound { .. } => AppError::NotFound("not found".to_string()),
            GateError::RateLimited { message } => AppError::TooManyRequests(message),
            GateError::Storage { .. }
            | GateError::LockPoisoned { .. }
            | GateError::Io { .. }
            | GateError::Network { .. }
            | GateError::Internal { .. } => AppError::Internal("internal error".to_string()),
        }
    }
}
