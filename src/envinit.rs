//! Per-module configuration files.
//!
//! Each module owns `config/<module>/` under the project root:
//!
//! * `module.toml` is written with the module's defaults the first time the
//!   module starts and is never overwritten afterwards;
//! * `local.toml` is an optional developer override;
//! * environment variables supplied by the module win over both files.

use std::fs;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::paths;

pub const CONFIG_DIR: &str = "config";
pub const MODULE_FILE: &str = "module.toml";
pub const LOCAL_FILE: &str = "local.toml";

#[derive(Error, Debug)]
pub enum EnvInitError {
    #[error("no base directory for module config")]
    NoBaseDir,
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rendering defaults failed: {0}")]
    Render(#[from] toml::ser::Error),
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for EnvInitError {
    fn from(err: figment::Error) -> Self {
        EnvInitError::Figment(Box::new(err))
    }
}

/// Result of loading one module's configuration.
#[derive(Debug, Clone)]
pub struct ModuleConfig<T> {
    pub value: T,
    pub dir: PathBuf,
    /// True when `module.toml` was generated during this call.
    pub created: bool,
}

/// Load `T` for `module`, layering defaults, `module.toml`, `local.toml`, then `env`.
pub fn load<T, P>(module: &str, summary: &str, env: P) -> Result<ModuleConfig<T>, EnvInitError>
where
    T: Serialize + DeserializeOwned + Default,
    P: Provider,
{
    let base = paths::project_root().ok_or(EnvInitError::NoBaseDir)?;
    load_from(&base, module, summary, env)
}

pub fn load_from<T, P>(base: &Path, module: &str, summary: &str, env: P) -> Result<ModuleConfig<T>, EnvInitError>
where
    T: Serialize + DeserializeOwned + Default,
    P: Provider,
{
    let dir = base.join(CONFIG_DIR).join(module);
    fs::create_dir_all(&dir).map_err(|source| EnvInitError::Io {
        path: dir.clone(),
        source,
    })?;

    let main = dir.join(MODULE_FILE);
    let created = write_defaults_if_missing::<T>(&main, summary)?;
    if created {
        info!(module = %module, path = %main.display(), "created default config");
    }

    let local = dir.join(LOCAL_FILE);
    let value: T = Figment::from(Serialized::defaults(T::default()))
        .merge(Toml::file(&main))
        .merge(Toml::file(&local))
        .merge(env)
        .extract()?;

    debug!(module = %module, dir = %dir.display(), "loaded module config");
    Ok(ModuleConfig { value, dir, created })
}

fn write_defaults_if_missing<T: Serialize + Default>(path: &Path, summary: &str) -> Result<bool, EnvInitError> {
    if path.exists() {
        return Ok(false);
    }
    let body = toml::to_string_pretty(&T::default())?;
    let content = format!(
        "# Auto-generated on {}\n# {}\n# local.toml in this directory and environment variables override these values.\n\n{}",
        chrono::Utc::now().to_rfc3339(),
        summary,
        body
    );
    fs::write(path, content).map_err(|source| EnvInitError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Only the first 3 and last 3 characters of a secret are ever logged.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => "<empty>".to_string(),
        n if n <= 6 => "***".to_string(),
        n => {
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[n - 3..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}

/// Serde helpers for config fields that may arrive as typed scalars.
///
/// Environment providers parse `1234` as a number and `true` as a bool; a
/// field declared as text should still accept them.
pub mod de {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Bool(b) => b.to_string(),
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Text(s) => s,
            }
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(Scalar::deserialize(deserializer)?.into_string())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
    }

    /// Boolean-like token (`1/0`, `true/false`, `yes/no`, `on/off`).
    pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = Scalar::deserialize(deserializer)?.into_string();
        crate::module_resolve::parse_flag(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a boolean: {raw:?}")))
    }
}
