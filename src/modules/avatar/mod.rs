//! Avatar uploads.
//!
//! Uploaded images are sniffed by magic bytes, named by the SHA-256 of their
//! content and written once. The storage directory is exposed read-only under
//! `url_prefix`.

mod handlers;
pub mod service;

use std::sync::{Arc, OnceLock};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use figment::providers::Env;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::envinit::{self, de};
use crate::module_registry::{FeatureModule, ModuleError};
use crate::paths;
use crate::server::Server;

use service::AvatarService;

pub const NAME: &str = "avatar";

/// Headroom for multipart framing on top of the file limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarConfig {
    #[serde(deserialize_with = "de::string")]
    pub dir: String,
    #[serde(deserialize_with = "de::string")]
    pub url_prefix: String,
    pub max_mb: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            dir: "assets/avatar".to_string(),
            url_prefix: "/assets/avatar".to_string(),
            max_mb: 5,
        }
    }
}

impl AvatarConfig {
    pub fn max_bytes(&self) -> usize {
        usize::try_from(self.max_mb.max(1))
            .unwrap_or(usize::MAX / (1 << 20))
            .saturating_mul(1 << 20)
    }
}

#[derive(Default)]
pub struct AvatarModule {
    config: OnceLock<AvatarConfig>,
}

impl AvatarModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AvatarConfig) -> Self {
        let module = Self::default();
        let _ = module.config.set(config);
        module
    }
}

pub fn router(svc: Arc<AvatarService>) -> Router {
    let limit = svc.max_bytes().saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/", post(handlers::upload))
        .route("/{id}", get(handlers::lookup))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(svc)
}

impl FeatureModule for AvatarModule {
    fn name(&self) -> &str {
        NAME
    }

    fn default_prefix(&self) -> &str {
        "/api/avatar"
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn init_env(&self) {
        if self.config.get().is_some() {
            return;
        }
        let config = match envinit::load::<AvatarConfig, _>(NAME, "Avatar module config.", Env::prefixed("AVATAR_")) {
            Ok(loaded) => loaded.value,
            Err(e) => {
                warn!(module = NAME, error = %e, "config load failed; using defaults");
                AvatarConfig::default()
            }
        };
        let _ = self.config.set(config);
    }

    fn mount(&self, server: &mut Server, prefix: &str) -> Result<(), ModuleError> {
        let config = self
            .config
            .get()
            .ok_or_else(|| ModuleError::config(NAME, "configuration not loaded"))?;

        let dir = paths::under_root(&config.dir);
        std::fs::create_dir_all(&dir).map_err(|e| ModuleError::storage(NAME, e))?;

        let svc = Arc::new(AvatarService::new(&dir, &config.url_prefix, config.max_bytes()));
        server.transaction(|s| {
            s.nest_service(&config.url_prefix, ServeDir::new(&dir))?;
            s.nest(prefix, router(svc))
        })?;

        info!(
            module = NAME,
            dir = %dir.display(),
            url_prefix = %config.url_prefix,
            max_mb = config.max_mb,
            "avatar storage ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::service::fixtures::PNG;
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path, max_mb: u64) -> Router {
        let module = AvatarModule::with_config(AvatarConfig {
            dir: dir.to_string_lossy().to_string(),
            url_prefix: "/assets/avatar".into(),
            max_mb,
        });
        let mut server = Server::new();
        module.mount(&mut server, "/api/avatar").unwrap();
        server.into_router()
    }

    async fn json(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart(field: &str, content: &[u8]) -> Request<Body> {
        let boundary = "X-MODGATE-BOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/avatar")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn raw_upload_then_lookup_and_static_fetch() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 5);

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/avatar")
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(Body::from(PNG))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json(res).await;
        let id = body["avatarId"].as_str().unwrap().to_string();
        assert_eq!(body["url"], format!("/assets/avatar/{id}.png"));

        let res = app
            .clone()
            .oneshot(Request::builder().uri(format!("/api/avatar/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["avatarId"], id.as_str());

        let res = app
            .oneshot(Request::builder().uri(format!("/assets/avatar/{id}.png")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn failed_mount_leaves_no_static_route() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("seed.png"), PNG).unwrap();
        let module = AvatarModule::with_config(AvatarConfig {
            dir: dir.path().to_string_lossy().to_string(),
            url_prefix: "/assets/avatar".into(),
            max_mb: 5,
        });

        let mut server = Server::new();
        server.nest("/api/avatar", Router::new()).unwrap();
        let err = module.mount(&mut server, "/api/avatar").unwrap_err();
        assert!(matches!(err, ModuleError::PrefixConflict { .. }));
        assert!(!server.is_claimed("/assets/avatar"));

        let res = server
            .into_router()
            .oneshot(Request::builder().uri("/assets/avatar/seed.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn multipart_upload_requires_file_field() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 5);

        let res = app.clone().oneshot(multipart("file", PNG)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.oneshot(multipart("picture", PNG)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res).await["error"], "file missing");
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 1);

        let mut big = PNG.to_vec();
        big.resize(1024 * 1024 + 1, 0);
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/avatar")
                    .body(Body::from(big))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json(res).await["error"], "file too large");
    }

    #[tokio::test]
    async fn lookup_errors() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 5);

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/api/avatar/not-hex").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/avatar/{}", "a".repeat(64)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_image_is_rejected() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 5);

        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/avatar")
                    .body(Body::from("plain text"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
