use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

/// Build identity reported by `/version` and `/`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub code_name: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub build: &'static str,
}

impl BuildInfo {
    /// Version from the package; commit and build stamped at compile time via
    /// `MODGATE_COMMIT` / `MODGATE_BUILD`.
    pub fn current() -> Self {
        Self {
            code_name: "Roast",
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("MODGATE_COMMIT").unwrap_or("none"),
            build: option_env!("MODGATE_BUILD").unwrap_or("local"),
        }
    }
}

pub async fn status() -> Json<Value> {
    Json(json!({ "message": "OK" }))
}

pub async fn version(State(build): State<BuildInfo>) -> Json<BuildInfo> {
    Json(build)
}

pub async fn root(State(build): State<BuildInfo>) -> Json<Value> {
    Json(json!({
        "message": "modgate is running.",
        "version": build.version,
        "commit": build.commit,
        "build": build.build,
    }))
}
