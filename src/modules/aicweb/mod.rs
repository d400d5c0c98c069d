//! Toy account and form demo behind a `{code, message, data}` envelope.
//!
//! Accounts live in sled, sessions in memory. Registration optionally sends an
//! activation link; register and login may be gated by Cloudflare Turnstile.

mod activation;
pub mod dto;
pub mod forms;
mod handlers;
pub mod service;
pub mod store;
pub mod turnstile;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::email::{self, EmailSender};
use crate::envinit::{self, de};
use crate::module_registry::{FeatureModule, ModuleError};
use crate::paths;
use crate::rate_limiter::RateLimiter;
use crate::server::Server;

pub use activation::ActivationNotifier;
pub use handlers::{AicwebState, ClientIp};
use service::AuthService;
use store::AicwebStore;
use turnstile::{HttpTurnstile, TurnstileVerifier};

pub const NAME: &str = "aicweb";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AicwebConfig {
    #[serde(deserialize_with = "de::string")]
    pub db_path: String,
    #[serde(deserialize_with = "de::string")]
    pub activation_base_url: String,
    /// Empty disables the debug log.
    #[serde(deserialize_with = "de::string")]
    pub activation_debug_file: String,
    pub activation_ttl_hours: u32,
    #[serde(deserialize_with = "de::flag")]
    pub require_activation: bool,
    pub login_max_attempts: usize,
    pub login_window_secs: u64,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub turnstile_secret: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub turnstile_enabled: Option<String>,
}

impl Default for AicwebConfig {
    fn default() -> Self {
        Self {
            db_path: "databases/aicweb".to_string(),
            activation_base_url: "http://localhost:8080/api/aicweb/user/activate".to_string(),
            activation_debug_file: "databases/aicweb/activation_tokens.debug.log".to_string(),
            activation_ttl_hours: service::DEFAULT_TTL_HOURS,
            require_activation: true,
            login_max_attempts: 10,
            login_window_secs: 60,
            turnstile_secret: None,
            turnstile_enabled: None,
        }
    }
}

fn env_provider() -> Figment {
    Figment::new()
        .merge(Env::prefixed("AICWEB_"))
        .merge(Env::raw().only(&["TURNSTILE_SECRET", "TURNSTILE_ENABLED"]))
}

#[derive(Default)]
pub struct AicwebModule {
    config: OnceLock<AicwebConfig>,
    sender: OnceLock<Arc<dyn EmailSender>>,
    verifier: OnceLock<Arc<dyn TurnstileVerifier>>,
}

impl AicwebModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed configuration and collaborators; nothing is read from disk or the environment.
    pub fn with_parts(
        config: AicwebConfig,
        sender: Arc<dyn EmailSender>,
        verifier: Option<Arc<dyn TurnstileVerifier>>,
    ) -> Self {
        let module = Self::default();
        let _ = module.config.set(config);
        let _ = module.sender.set(sender);
        if let Some(verifier) = verifier {
            let _ = module.verifier.set(verifier);
        }
        module
    }

    fn build_state(&self, config: &AicwebConfig) -> Result<AicwebState, ModuleError> {
        let db_path = paths::under_root(&config.db_path);
        let store = AicwebStore::open(&db_path).map_err(|e| ModuleError::storage(NAME, e))?;

        let sender = self.sender.get_or_init(email::sender_from_env).clone();
        let verifier = match self.verifier.get() {
            Some(v) => v.clone(),
            None => {
                let ts = HttpTurnstile::new(config.turnstile_secret.as_deref(), config.turnstile_enabled.as_deref())
                    .map_err(|e| ModuleError::other(NAME, e.to_string()))?;
                Arc::new(ts)
            }
        };

        let debug_file = Some(config.activation_debug_file.trim())
            .filter(|p| !p.is_empty())
            .map(paths::under_root);
        let auth = AuthService::new(store, config.require_activation, config.activation_ttl_hours);

        info!(
            module = NAME,
            db = %db_path.display(),
            require_activation = auth.require_activation(),
            ttl_hours = auth.ttl_hours(),
            turnstile = verifier.enabled(),
            email = sender.name(),
            "aicweb ready"
        );

        Ok(AicwebState {
            auth,
            notifier: ActivationNotifier::new(&config.activation_base_url, debug_file, sender),
            turnstile: verifier,
            login_limiter: RateLimiter::new(
                config.login_max_attempts.max(1),
                Duration::from_secs(config.login_window_secs.max(1)),
            ),
        })
    }
}

pub fn router(state: Arc<AicwebState>) -> Router {
    Router::new()
        .route("/user/register", post(handlers::register))
        .route("/user/login", post(handlers::login))
        .route("/user/activate", get(handlers::activate))
        .route("/user/profile", get(handlers::profile))
        .route("/forms", post(handlers::submit_form).get(handlers::list_forms))
        .with_state(state)
}

impl FeatureModule for AicwebModule {
    fn name(&self) -> &str {
        NAME
    }

    fn default_prefix(&self) -> &str {
        "/api/aicweb"
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn init_env(&self) {
        if self.config.get().is_none() {
            let config = match envinit::load::<AicwebConfig, _>(NAME, "AICWeb demo config.", env_provider()) {
                Ok(loaded) => loaded.value,
                Err(e) => {
                    warn!(module = NAME, error = %e, "config load failed; using defaults");
                    AicwebConfig::default()
                }
            };
            let _ = self.config.set(config);
        }
        self.sender.get_or_init(email::sender_from_env);
    }

    fn mount(&self, server: &mut Server, prefix: &str) -> Result<(), ModuleError> {
        let config = self
            .config
            .get()
            .ok_or_else(|| ModuleError::config(NAME, "configuration not loaded"))?;
        let state = self.build_state(config)?;
        server.nest(prefix, router(Arc::new(state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::testing::RecordingSender;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use figment::Jail;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::tempdir;
    use tower::ServiceExt;
    use turnstile::testing::FixedTurnstile;

    fn config(dir: &Path, require_activation: bool) -> AicwebConfig {
        AicwebConfig {
            db_path: dir.join("db").to_string_lossy().to_string(),
            activation_debug_file: dir.join("activation.log").to_string_lossy().to_string(),
            require_activation,
            login_max_attempts: 3,
            ..AicwebConfig::default()
        }
    }

    fn app(module: &AicwebModule) -> Router {
        let mut server = Server::new();
        module.mount(&mut server, "/api/aicweb").unwrap();
        server.into_router()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_bearer(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_activate_login_and_profile() {
        let dir = tempdir().unwrap();
        let sender = Arc::new(RecordingSender::default());
        let module = AicwebModule::with_parts(config(dir.path(), true), sender.clone(), None);
        let app = app(&module);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/aicweb/user/register",
                json!({"username": "ada", "email": "ada@example.com", "password": "pw"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["registered"], true);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/aicweb/user/login",
                json!({"email": "ada@example.com", "password": "pw"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["data"]["reason"], "NOT_ACTIVATED");

        let link = sender.sent.lock().unwrap()[0].text.clone();
        let token = link.rsplit("token=").next().unwrap().to_string();
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/aicweb/user/activate?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/aicweb/user/login",
                json!({"username": "ada", "password": "pw"}),
            ))
            .await
            .unwrap();
        let access = body_json(res).await["data"]["accessToken"].as_str().unwrap().to_string();

        let res = app
            .oneshot(get_bearer("/api/aicweb/user/profile", &access))
            .await
            .unwrap();
        let body = body_json(res).await;
        assert_eq!(body["data"]["email"], "ada@example.com");
        assert_eq!(body["data"]["username"], "ada");
    }

    #[tokio::test]
    async fn duplicate_email_is_a_business_error() {
        let dir = tempdir().unwrap();
        let module = AicwebModule::with_parts(config(dir.path(), false), Arc::new(RecordingSender::default()), None);
        let app = app(&module);
        let req = || {
            post_json(
                "/api/aicweb/user/register",
                json!({"username": "bob", "email": "bob@example.com", "password": "pw"}),
            )
        };

        app.clone().oneshot(req()).await.unwrap();
        let res = app.oneshot(req()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["code"], 1001);
    }

    #[tokio::test]
    async fn turnstile_gates_registration() {
        let dir = tempdir().unwrap();
        let module = AicwebModule::with_parts(
            config(dir.path(), false),
            Arc::new(RecordingSender::default()),
            Some(Arc::new(FixedTurnstile("good"))),
        );
        let app = app(&module);
        let creds = json!({"username": "cy", "email": "cy@example.com", "password": "pw"});

        let res = app
            .clone()
            .oneshot(post_json("/api/aicweb/user/register", creds.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["data"]["reason"], "missing turnstile token");

        let mut bad = creds.clone();
        bad["turnstileToken"] = json!("bad");
        let res = app
            .clone()
            .oneshot(post_json("/api/aicweb/user/register", bad))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["data"]["turnstile"][0], "invalid-input-response");

        let mut good = creds;
        good["cfTurnstileResponse"] = json!("good");
        let res = app.oneshot(post_json("/api/aicweb/user/register", good)).await.unwrap();
        assert_eq!(body_json(res).await["code"], 0);
    }

    #[tokio::test]
    async fn login_is_rate_limited_per_ip() {
        let dir = tempdir().unwrap();
        let module = AicwebModule::with_parts(config(dir.path(), false), Arc::new(RecordingSender::default()), None);
        let app = app(&module);
        let attempt = || post_json("/api/aicweb/user/login", json!({"email": "x@example.com", "password": "no"}));

        for _ in 0..3 {
            let res = app.clone().oneshot(attempt()).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        let res = app.oneshot(attempt()).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(res).await["code"], 429);
    }

    #[tokio::test]
    async fn forms_are_sanitized_and_listed_newest_first() {
        let dir = tempdir().unwrap();
        let module = AicwebModule::with_parts(config(dir.path(), false), Arc::new(RecordingSender::default()), None);
        let app = app(&module);

        app.clone()
            .oneshot(post_json(
                "/api/aicweb/user/register",
                json!({"username": "dee", "email": "dee@example.com", "password": "pw"}),
            ))
            .await
            .unwrap();
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/aicweb/user/login",
                json!({"email": "dee@example.com", "password": "pw"}),
            ))
            .await
            .unwrap();
        let access = body_json(res).await["data"]["accessToken"].as_str().unwrap().to_string();

        let res = app
            .clone()
            .oneshot(get_bearer("/api/aicweb/forms", "not-a-session"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        for n in 1..=2 {
            let res = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/aicweb/forms")
                        .header(header::AUTHORIZATION, format!("Bearer {access}"))
                        .body(Body::from(json!({"n": n, "password": "secret"}).to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app
            .oneshot(get_bearer("/api/aicweb/forms?limit=500", &access))
            .await
            .unwrap();
        let items = body_json(res).await["data"]["items"].as_array().unwrap().clone();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["payload"], json!({"n": 2}));
    }

    #[test]
    fn env_overrides_module_and_turnstile_settings() {
        Jail::expect_with(|jail| {
            jail.set_env("AICWEB_REQUIRE_ACTIVATION", "0");
            jail.set_env("AICWEB_ACTIVATION_TTL_HOURS", "48");
            jail.set_env("TURNSTILE_SECRET", "0x4AAA");
            jail.set_env("TURNSTILE_ENABLED", "false");

            let base = jail.directory().to_path_buf();
            let cfg: AicwebConfig = envinit::load_from(&base, NAME, "AICWeb demo config.", env_provider())
                .unwrap()
                .value;
            assert!(!cfg.require_activation);
            assert_eq!(cfg.activation_ttl_hours, 48);
            assert_eq!(cfg.turnstile_secret.as_deref(), Some("0x4AAA"));
            assert!(!turnstile::is_enabled(cfg.turnstile_secret.as_deref(), cfg.turnstile_enabled.as_deref()));
            Ok(())
        });
    }
}
