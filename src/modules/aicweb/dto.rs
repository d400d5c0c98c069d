//! Wire types. Every response is wrapped as `{code, message, data}` where code
//! 0 means success.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::error;

use crate::errors::GateError;

pub const CODE_OK: i32 = 0;
pub const CODE_BAD_REQUEST: i32 = 400;
pub const CODE_UNAUTHORIZED: i32 = 401;
pub const CODE_NOT_FOUND: i32 = 404;
pub const CODE_TOO_MANY_REQUESTS: i32 = 429;
pub const CODE_INTERNAL: i32 = 500;
pub const CODE_EMAIL_IN_USE: i32 = 1001;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub code: i32,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or(Value::Null);
        Self {
            code: CODE_OK,
            message: "ok".to_string(),
            data: if data.is_null() { Value::Object(Map::new()) } else { data },
        }
    }

    fn fail(code: i32, message: &str, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: data.unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

pub type ApiResult = Result<Json<Envelope>, AicwebError>;

pub fn ok(data: impl Serialize) -> ApiResult {
    Ok(Json(Envelope::ok(data)))
}

#[derive(Error, Debug)]
pub enum AicwebError {
    #[error("bad request")]
    BadRequest(Option<Value>),
    #[error("unauthorized")]
    Unauthorized,
    #[error("account not activated")]
    NotActivated,
    #[error("not found")]
    NotFound,
    #[error("too many requests")]
    RateLimited,
    #[error("email already in use")]
    EmailInUse,
    #[error(transparent)]
    Internal(#[from] GateError),
}

impl AicwebError {
    pub fn reason(reason: &str) -> Self {
        AicwebError::BadRequest(Some(json!({ "reason": reason })))
    }

    /// HTTP status and envelope for this error.
    pub fn parts(&self) -> (StatusCode, Envelope) {
        match self {
            AicwebError::BadRequest(data) => (
                StatusCode::BAD_REQUEST,
                Envelope::fail(CODE_BAD_REQUEST, "Bad Request", data.clone()),
            ),
            AicwebError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Envelope::fail(CODE_UNAUTHORIZED, "Unauthorized", None),
            ),
            AicwebError::NotActivated => (
                StatusCode::UNAUTHORIZED,
                Envelope::fail(CODE_UNAUTHORIZED, "Unauthorized", Some(json!({ "reason": "NOT_ACTIVATED" }))),
            ),
            AicwebError::NotFound => (
                StatusCode::NOT_FOUND,
                Envelope::fail(CODE_NOT_FOUND, "Not Found", None),
            ),
            AicwebError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Envelope::fail(CODE_TOO_MANY_REQUESTS, "Too Many Requests", None),
            ),
            // Business failure: transport succeeded.
            AicwebError::EmailInUse => (
                StatusCode::OK,
                Envelope::fail(CODE_EMAIL_IN_USE, "The email is already in use.", None),
            ),
            AicwebError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Envelope::fail(CODE_INTERNAL, "Internal Server Error", None),
            ),
        }
    }
}

impl IntoResponse for AicwebError {
    fn into_response(self) -> Response {
        if let AicwebError::Internal(e) = &self {
            error!(module = "aicweb", error = %e, "request failed");
        }
        let (status, body) = self.parts();
        (status, Json(body)).into_response()
    }
}

/// `username` may carry an email address for older clients.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub registered: bool,
    pub activation_required: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateQuery {
    #[serde(default)]
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_never_has_null_data() {
        let env = Envelope::ok(());
        assert_eq!(env.code, 0);
        assert_eq!(env.message, "ok");
        assert_eq!(env.data, json!({}));
    }

    #[test]
    fn error_parts() {
        let (status, env) = AicwebError::EmailInUse.parts();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(env.code, CODE_EMAIL_IN_USE);

        let (status, env) = AicwebError::NotActivated.parts();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(env.data["reason"], "NOT_ACTIVATED");

        let (status, env) = AicwebError::Internal(GateError::internal("boom")).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(env.message, "Internal Server Error");
    }
}
