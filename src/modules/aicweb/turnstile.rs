//! Cloudflare Turnstile verification.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{GateError, GateResult};

pub const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
pub const TOKEN_HEADER: &str = "CF-Turnstile-Response";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub success: bool,
    pub error_codes: Vec<String>,
}

#[async_trait]
pub trait TurnstileVerifier: Send + Sync {
    fn enabled(&self) -> bool;
    async fn verify(&self, token: &str, remote_ip: &str) -> GateResult<Verdict>;
}

/// Token from the header, else from `turnstileToken` / `cfTurnstileResponse` in the JSON body.
pub fn extract_token(headers: &HeaderMap, body: Option<&Value>) -> Option<String> {
    let from_header = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }
    let body = body?;
    ["turnstileToken", "cfTurnstileResponse"]
        .iter()
        .filter_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Enabled when a secret is configured, unless `TURNSTILE_ENABLED` is explicitly `false`.
pub fn is_enabled(secret: Option<&str>, flag: Option<&str>) -> bool {
    let has_secret = secret.is_some_and(|s| !s.trim().is_empty());
    let switched_off = flag.is_some_and(|f| f.trim().eq_ignore_ascii_case("false"));
    has_secret && !switched_off
}

pub struct HttpTurnstile {
    client: reqwest::Client,
    secret: String,
    enabled: bool,
    endpoint: String,
}

#[derive(Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl HttpTurnstile {
    pub fn new(secret: Option<&str>, flag: Option<&str>) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GateError::network("build turnstile client", e))?;
        Ok(Self {
            client,
            secret: secret.unwrap_or_default().trim().to_string(),
            enabled: is_enabled(secret, flag),
            endpoint: SITEVERIFY_URL.to_string(),
        })
    }
}

#[async_trait]
impl TurnstileVerifier for HttpTurnstile {
    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn verify(&self, token: &str, remote_ip: &str) -> GateResult<Verdict> {
        if !self.enabled {
            return Ok(Verdict {
                success: true,
                error_codes: Vec::new(),
            });
        }
        if token.is_empty() {
            return Ok(Verdict {
                success: false,
                error_codes: vec!["missing-token".to_string()],
            });
        }

        let mut form = vec![("secret", self.secret.as_str()), ("response", token)];
        if remote_ip.parse::<IpAddr>().is_ok() {
            form.push(("remoteip", remote_ip));
        }

        let res: SiteverifyResponse = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| GateError::network("turnstile siteverify", e))?
            .json()
            .await
            .map_err(|e| GateError::network("decode siteverify response", e))?;

        Ok(Verdict {
            success: res.success,
            error_codes: if res.success { Vec::new() } else { res.error_codes },
        })
    }
}
