use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, LOCATION},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{error, info};

use super::service::RedirectService;
use super::store::{NfcCard, RedirectRule};
use crate::api_errors::AppError;

pub struct RedirectState {
    pub service: RedirectService,
    pub admin_token: Option<String>,
}

fn found(url: &str) -> Response {
    match HeaderValue::from_str(url) {
        Ok(location) => (
            StatusCode::FOUND,
            [(LOCATION, location), (CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        )
            .into_response(),
        Err(_) => {
            error!(url = %url, "redirect target is not a valid header value");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// `GET /{name}`
pub async fn redirect_by_name(State(st): State<Arc<RedirectState>>, Path(name): Path<String>) -> Response {
    match st.service.resolve_by_name(&name) {
        Ok(res) if res.url.is_empty() => (StatusCode::NOT_FOUND, "not found").into_response(),
        Ok(res) => found(&res.url),
        Err(e) => {
            error!(name = %name, error = %e, "redirect lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// `GET /pncs/{hwid}`
pub async fn redirect_nfc(State(st): State<Arc<RedirectState>>, Path(hwid): Path<String>) -> Response {
    match st.service.resolve_nfc(&hwid) {
        Ok(url) if !url.is_empty() => found(&url),
        Ok(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response(),
        Err(e) => {
            error!(hwid = %hwid, error = %e, "nfc lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

fn require_admin(st: &RedirectState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = st
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::not_found("not found"))?;
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::unauthorized("invalid admin token")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleReq {
    target_url: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// `PUT /rules/{name}`
pub async fn put_rule(
    State(st): State<Arc<RedirectState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<RuleReq>,
) -> Result<(StatusCode, Json<RedirectRule>), AppError> {
    require_admin(&st, &headers)?;
    let target = req.target_url.trim();
    if target.is_empty() || HeaderValue::from_str(target).is_err() {
        return Err(AppError::bad_request("targetUrl must be a non-empty URL"));
    }

    let rule = st.service.store().upsert_rule(&name, target, req.enabled).map_err(|e| {
        error!(name = %name, error = %e, "rule upsert failed");
        AppError::from(e)
    })?;
    info!(name = %name, enabled = rule.enabled, "redirect rule saved");
    Ok((StatusCode::OK, Json(rule)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardReq {
    registered: bool,
    #[serde(default)]
    user_id: String,
}

/// `PUT /pncs/{hwid}`
pub async fn put_card(
    State(st): State<Arc<RedirectState>>,
    headers: HeaderMap,
    Path(hwid): Path<String>,
    Json(req): Json<CardReq>,
) -> Result<(StatusCode, Json<NfcCard>), AppError> {
    require_admin(&st, &headers)?;
    if req.registered && req.user_id.trim().is_empty() {
        return Err(AppError::bad_request("userId is required for a registered card"));
    }

    let card = st
        .service
        .store()
        .upsert_card(&hwid, req.registered, req.user_id.trim())
        .map_err(|e| {
            error!(hwid = %hwid, error = %e, "card upsert failed");
            AppError::from(e)
        })?;
    info!(hwid = %hwid, registered = card.is_registered, "nfc card saved");
    Ok((StatusCode::OK, Json(card)))
}
