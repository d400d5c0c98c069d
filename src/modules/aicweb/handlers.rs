use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderMap},
};
use serde_json::{json, Value};
use tracing::warn;

use super::activation::ActivationNotifier;
use super::dto::{
    ok, ActivateQuery, AicwebError, ApiResult, ListQuery, LoginData, LoginRequest, ProfileData, RegisterData,
    RegisterRequest,
};
use super::forms::{self, FormRejection};
use super::service::AuthService;
use super::store::UserRecord;
use super::turnstile::{self, TurnstileVerifier};
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;

pub struct AicwebState {
    pub auth: AuthService,
    pub notifier: ActivationNotifier,
    pub turnstile: Arc<dyn TurnstileVerifier>,
    pub login_limiter: RateLimiter,
}

/// Best-effort client address: proxy headers first, then the socket peer.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = header_value(&parts.headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next().map(str::trim).map(str::to_string))
            .filter(|v| !v.is_empty());
        let ip = forwarded
            .or_else(|| header_value(&parts.headers, "x-real-ip").map(str::to_string))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientIp(ip))
    }
}

/// The user behind `Authorization: Bearer <token>`.
pub struct AuthUser(pub UserRecord);

impl FromRequestParts<Arc<AicwebState>> for AuthUser {
    type Rejection = AicwebError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AicwebState>) -> Result<Self, Self::Rejection> {
        let token = header_value(&parts.headers, header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AicwebError::Unauthorized)?;
        state
            .auth
            .authenticate(token)?
            .map(AuthUser)
            .ok_or(AicwebError::Unauthorized)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_json(body: &Bytes) -> Result<Value, AicwebError> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|_| AicwebError::reason("invalid json"))
}

async fn check_turnstile(
    state: &AicwebState,
    headers: &HeaderMap,
    body: &Value,
    ip: &str,
) -> Result<(), AicwebError> {
    if !state.turnstile.enabled() {
        return Ok(());
    }
    let Some(token) = turnstile::extract_token(headers, Some(body)) else {
        return Err(AicwebError::reason("missing turnstile token"));
    };
    let verdict = match state.turnstile.verify(&token, ip).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(module = "aicweb", error = %e, "turnstile verification unavailable");
            return Err(AicwebError::BadRequest(Some(json!({ "turnstile": ["internal-error"] }))));
        }
    };
    if verdict.success {
        Ok(())
    } else {
        Err(AicwebError::BadRequest(Some(json!({ "turnstile": verdict.error_codes }))))
    }
}

pub async fn register(
    State(st): State<Arc<AicwebState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let value = parse_json(&body)?;
    check_turnstile(&st, &headers, &value, &ip).await?;
    let req: RegisterRequest = serde_json::from_value(value).map_err(|_| AicwebError::reason("invalid json"))?;

    let registration = st.auth.register(&req.username, &req.email, &req.password)?;
    if let Some(activation) = &registration.activation {
        st.notifier.notify(&registration.user.email, &activation.token).await;
    }

    ok(RegisterData {
        registered: true,
        activation_required: registration.activation.is_some(),
    })
}

pub async fn login(
    State(st): State<Arc<AicwebState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    if !st.login_limiter.try_acquire(&ip).await {
        warn!(module = "aicweb", ip = %ip, "login rate limit exceeded");
        return Err(AicwebError::RateLimited);
    }

    let value = parse_json(&body)?;
    check_turnstile(&st, &headers, &value, &ip).await?;
    let req: LoginRequest = serde_json::from_value(value).map_err(|_| AicwebError::reason("invalid json"))?;

    let access_token = st.auth.login(&req.username, &req.email, &req.password)?;
    ok(LoginData { access_token })
}

pub async fn activate(State(st): State<Arc<AicwebState>>, Query(q): Query<ActivateQuery>) -> ApiResult {
    let user = st.auth.activate(&q.token)?;
    ok(json!({ "activated": true, "userId": user.id }))
}

pub async fn profile(AuthUser(user): AuthUser) -> ApiResult {
    ok(ProfileData {
        id: user.id,
        username: user.username,
        email: user.email,
        created_at: user.created_at,
    })
}

pub async fn submit_form(
    State(st): State<Arc<AicwebState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let payload = forms::sanitize_body(&body).map_err(|r: FormRejection| AicwebError::reason(r.reason()))?;
    let user_agent = header_value(&headers, header::USER_AGENT.as_str()).unwrap_or_default();
    let form = st.auth.store().insert_form(&user.id, payload, &ip, user_agent)?;
    ok(json!({ "id": form.id.to_string(), "createdAt": form.created_at }))
}

pub fn list_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| (1..=MAX_LIST_LIMIT).contains(n))
        .unwrap_or(DEFAULT_LIST_LIMIT)
}

pub async fn list_forms(
    State(st): State<Arc<AicwebState>>,
    AuthUser(user): AuthUser,
    Query(q): Query<ListQuery>,
) -> ApiResult {
    let limit = list_limit(q.limit.as_deref());
    let items: Vec<Value> = st
        .auth
        .store()
        .list_forms(&user.id, limit)?
        .into_iter()
        .map(|f| json!({ "id": f.id.to_string(), "payload": f.payload, "createdAt": f.created_at }))
        .collect();
    ok(json!({ "items": items }))
}
