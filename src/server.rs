use std::collections::BTreeSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, MethodRouter},
    Router,
};
use tower::Service;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app_config::ServerConfig;
use crate::info::{self, BuildInfo};
use crate::module_mount::{mount_all, MountReport};
use crate::module_registry::{ModuleError, ModuleRegistry};

/// Mount target handed to feature modules.
///
/// Wraps the application router and remembers which prefixes are taken. A
/// prefix the router would refuse (a repeat, a path parameter, an overlap with
/// routes already mounted) fails the mount with a [`ModuleError`] and leaves
/// the router as it was.
#[derive(Default)]
pub struct Server {
    router: Router,
    claimed: BTreeSet<String>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level route that belongs to the server itself.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) {
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, method_router);
    }

    /// Nest `router` under `prefix`; `/` merges at the root.
    pub fn nest(&mut self, prefix: &str, router: Router) -> Result<(), ModuleError> {
        let key = self.claim(prefix)?;
        let path = key.clone();
        self.apply(&key, move |current| {
            if path == "/" {
                current.merge(router)
            } else {
                current.nest(&path, router)
            }
        })
    }

    /// Nest a tower service (static files and the like) under `prefix`.
    pub fn nest_service<S>(&mut self, prefix: &str, service: S) -> Result<(), ModuleError>
    where
        S: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        S::Response: IntoResponse,
        S::Future: Send + 'static,
    {
        if mount_key(prefix) == "/" {
            return Err(ModuleError::InvalidPrefix {
                prefix: "/".into(),
                reason: "services cannot be nested at the root".into(),
            });
        }
        let key = self.claim(prefix)?;
        let path = key.clone();
        self.apply(&key, move |current| current.nest_service(&path, service))
    }

    /// Run `mount` and keep its routes only if it succeeds; on error the
    /// router and the claimed prefixes are restored.
    pub fn transaction<F>(&mut self, mount: F) -> Result<(), ModuleError>
    where
        F: FnOnce(&mut Server) -> Result<(), ModuleError>,
    {
        let router = self.router.clone();
        let claimed = self.claimed.clone();
        let result = mount(self);
        if result.is_err() {
            self.router = router;
            self.claimed = claimed;
        }
        result
    }

    pub fn is_claimed(&self, prefix: &str) -> bool {
        self.claimed.contains(&mount_key(prefix))
    }

    pub fn claimed(&self) -> impl Iterator<Item = &str> {
        self.claimed.iter().map(String::as_str)
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    fn claim(&mut self, prefix: &str) -> Result<String, ModuleError> {
        let key = mount_key(prefix);
        if key.contains(['{', '}', '*']) {
            return Err(ModuleError::InvalidPrefix {
                prefix: key,
                reason: "path parameters are not allowed".into(),
            });
        }
        if !self.claimed.insert(key.clone()) {
            return Err(ModuleError::PrefixConflict { prefix: key });
        }
        Ok(key)
    }

    /// axum panics on conflicting routes; turn that into an error and keep
    /// the previous router.
    fn apply<F>(&mut self, key: &str, change: F) -> Result<(), ModuleError>
    where
        F: FnOnce(Router) -> Router,
    {
        let current = self.router.clone();
        match panic::catch_unwind(AssertUnwindSafe(move || change(current))) {
            Ok(router) => {
                self.router = router;
                Ok(())
            }
            Err(payload) => {
                self.claimed.remove(key);
                let reason = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "conflicting routes".into());
                Err(ModuleError::InvalidPrefix {
                    prefix: key.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Router-facing form of a prefix: one leading slash, no trailing slash.
fn mount_key(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// Build the full application router and report what the modules did.
pub fn build_app(config: &ServerConfig, registry: &ModuleRegistry) -> (Router, MountReport) {
    let build = BuildInfo::current();
    let mut server = Server::new();

    server.route("/status", get(info::status));
    server.route("/version", get(info::version).with_state(build.clone()));

    let report = mount_all(registry, &mut server);

    if !server.is_claimed("/") {
        server.route("/", get(info::root).with_state(build));
    }

    let mut router = server.into_router().layer(TraceLayer::new_for_http());
    if let Some(cors) = cors_layer(config) {
        router = router.layer(cors);
    }
    (router, report)
}

fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    let headers: Vec<HeaderName> = config
        .cors_headers()
        .iter()
        .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers(headers)
            .allow_credentials(config.cors_credentials())
            .max_age(Duration::from_secs(12 * 60 * 60)),
    )
}

/// Mount modules, bind, and serve until Ctrl-C.
pub async fn serve(config: ServerConfig, registry: ModuleRegistry) -> anyhow::Result<()> {
    let (app, report) = build_app(&config, &registry);
    info!(
        mounted = report.mounted.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "module mounting finished"
    );

    let listener = tokio::net::TcpListener::bind(config.addr.as_str()).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
