//! Short-link and NFC card redirects.
//!
//! `GET /{name}` answers with a 302 to the stored rule target, or to the
//! not-found template when no enabled rule exists. `GET /pncs/{hwid}` picks the
//! registered or unregistered card template. Admin upserts are mounted only
//! when `admin_token` is configured.

mod handlers;
pub mod service;
pub mod store;

use std::sync::{Arc, OnceLock};

use axum::{
    routing::{get, put},
    Router,
};
use figment::providers::Env;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::envinit::{self, de};
use crate::module_registry::{FeatureModule, ModuleError};
use crate::paths;
use crate::server::Server;

pub use handlers::RedirectState;
use service::RedirectService;
use store::RedirectStore;

pub const NAME: &str = "redirect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(deserialize_with = "de::string")]
    pub db_path: String,
    #[serde(deserialize_with = "de::string")]
    pub not_found_url: String,
    #[serde(deserialize_with = "de::string")]
    pub nfc_registered_url: String,
    #[serde(deserialize_with = "de::string")]
    pub nfc_unregistered_url: String,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            db_path: "databases/redirect".to_string(),
            not_found_url: "https://koch2333.cn/404?name={name}".to_string(),
            nfc_registered_url: "https://koch2333.cn/pncs/ok?uid={userId}&hwid={hwid}".to_string(),
            nfc_unregistered_url: "https://koch2333.cn/pncs/register?hwid={hwid}".to_string(),
            admin_token: None,
        }
    }
}

#[derive(Default)]
pub struct RedirectModule {
    config: OnceLock<RedirectConfig>,
}

impl RedirectModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip file and environment loading; used by tests and embedders.
    pub fn with_config(config: RedirectConfig) -> Self {
        let module = Self::default();
        let _ = module.config.set(config);
        module
    }
}

pub fn router(state: Arc<RedirectState>) -> Router {
    let mut router = Router::new()
        .route("/{name}", get(handlers::redirect_by_name))
        .route("/pncs/{hwid}", get(handlers::redirect_nfc));
    if state.admin_token.is_some() {
        router = router
            .route("/rules/{name}", put(handlers::put_rule))
            .route("/pncs/{hwid}", put(handlers::put_card));
    }
    router.with_state(state)
}

impl FeatureModule for RedirectModule {
    fn name(&self) -> &str {
        NAME
    }

    fn default_prefix(&self) -> &str {
        "/api/redirect"
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn init_env(&self) {
        if self.config.get().is_some() {
            return;
        }
        let loaded = envinit::load::<RedirectConfig, _>(
            NAME,
            "Redirect module config.",
            Env::prefixed("REDIRECT_"),
        );
        let config = match loaded {
            Ok(loaded) => loaded.value,
            Err(e) => {
                warn!(module = NAME, error = %e, "config load failed; using defaults");
                RedirectConfig::default()
            }
        };
        let _ = self.config.set(config);
    }

    fn mount(&self, server: &mut Server, prefix: &str) -> Result<(), ModuleError> {
        let config = self
            .config
            .get()
            .ok_or_else(|| ModuleError::config(NAME, "configuration not loaded"))?;

        let db_path = paths::under_root(&config.db_path);
        let store = RedirectStore::open(&db_path).map_err(|e| ModuleError::storage(NAME, e))?;
        info!(module = NAME, db = %db_path.display(), admin = config.admin_token.is_some(), "redirect store ready");

        let state = Arc::new(RedirectState {
            service: RedirectService::new(store, config),
            admin_token: config
                .admin_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        });
        server.nest(prefix, router(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn module(dir: &std::path::Path, admin: Option<&str>) -> RedirectModule {
        RedirectModule::with_config(RedirectConfig {
            db_path: dir.join("redirect").to_string_lossy().to_string(),
            admin_token: admin.map(str::to_string),
            ..RedirectConfig::default()
        })
    }

    fn app(module: &RedirectModule) -> Router {
        let mut server = Server::new();
        module.mount(&mut server, "/api/redirect").unwrap();
        server.into_router()
    }

    #[tokio::test]
    async fn unknown_name_redirects_to_not_found_template() {
        let dir = tempdir().unwrap();
        let app = app(&module(dir.path(), None));

        let res = app
            .oneshot(Request::builder().uri("/api/redirect/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "https://koch2333.cn/404?name=ghost");
        assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn admin_routes_absent_without_token() {
        let dir = tempdir().unwrap();
        let app = app(&module(dir.path(), None));

        let res = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/redirect/rules/home")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"targetUrl":"https://example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(res.status().is_client_error());
    }

    #[tokio::test]
    async fn admin_upsert_then_redirect() {
        let dir = tempdir().unwrap();
        let app = app(&module(dir.path(), Some("letmein")));

        let put = |auth: &'static str| {
            Request::builder()
                .method("PUT")
                .uri("/api/redirect/rules/home")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, auth)
                .body(Body::from(r#"{"targetUrl":"https://example.com/home"}"#))
                .unwrap()
        };

        let res = app.clone().oneshot(put("Bearer wrong")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.clone().oneshot(put("Bearer letmein")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(Request::builder().uri("/api/redirect/home").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "https://example.com/home");
    }

    #[tokio::test]
    async fn registered_card_uses_registered_template() {
        let dir = tempdir().unwrap();
        let app = app(&module(dir.path(), Some("t0k")));

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/redirect/pncs/04AB")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer t0k")
                    .body(Body::from(r#"{"registered":true,"userId":"10001"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(Request::builder().uri("/api/redirect/pncs/04AB").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            res.headers()[header::LOCATION],
            "https://koch2333.cn/pncs/ok?uid=10001&hwid=04AB"
        );
    }

    #[test]
    fn mount_without_config_fails() {
        let module = RedirectModule::new();
        let mut server = Server::new();
        let err = module.mount(&mut server, "/r").unwrap_err();
        assert!(matches!(err, ModuleError::Config { .. }));
    }
}
