use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::envinit::de;
use crate::module_resolve::parse_flag;

pub const CONFIG_FILE: &str = "modgate.toml";

const DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "https://koch2333.cn",
];

const DEFAULT_HEADERS: &[&str] = &["CF-Turnstile-Response", "Authorization", "Content-Type"];

/// HTTP server settings. Layered as defaults, `modgate.toml`, then `HTTP_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr", deserialize_with = "de::string")]
    pub addr: String,
    /// Comma-separated allowed origins.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub cors_origins: Option<String>,
    /// Boolean-like token; unset means credentials are allowed.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub cors_credentials: Option<String>,
    /// Comma-separated extra allowed request headers.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub cors_headers: Option<String>,
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            cors_origins: None,
            cors_credentials: None,
            cors_headers: None,
        }
    }
}

impl ServerConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("HTTP_"))
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        let mut config: ServerConfig = figment.extract()?;
        config.addr = normalize_addr(&config.addr);
        if config.addr.is_empty() {
            return Err(figment::Error::from("HTTP_ADDR must not be empty".to_string()));
        }
        Ok(config)
    }

    pub fn cors_origins(&self) -> Vec<String> {
        split_or(self.cors_origins.as_deref(), DEFAULT_ORIGINS)
    }

    pub fn cors_headers(&self) -> Vec<String> {
        split_or(self.cors_headers.as_deref(), DEFAULT_HEADERS)
    }

    pub fn cors_credentials(&self) -> bool {
        match self.cors_credentials.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(v) => parse_flag(v).unwrap_or(false),
        }
    }
}

/// `:8080` binds every interface.
fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

fn split_or(raw: Option<&str>, defaults: &[&str]) -> Vec<String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_env() {
        Jail::expect_with(|_jail| {
            let cfg = ServerConfig::load()?;
            assert_eq!(cfg.addr, "0.0.0.0:8080");
            assert_eq!(cfg.cors_origins().len(), 4);
            assert!(cfg.cors_credentials());
            assert_eq!(cfg.cors_headers()[0], "CF-Turnstile-Response");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file_and_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, r#"addr = "127.0.0.1:9000""#)?;
            jail.set_env("HTTP_ADDR", ":7070");
            jail.set_env("HTTP_CORS_ORIGINS", "https://a.example, https://b.example,");
            jail.set_env("HTTP_CORS_CREDENTIALS", "0");

            let cfg = ServerConfig::load()?;
            assert_eq!(cfg.addr, "0.0.0.0:7070");
            assert_eq!(cfg.cors_origins(), vec!["https://a.example", "https://b.example"]);
            assert!(!cfg.cors_credentials());
            Ok(())
        });
    }

    #[test]
    fn file_value_used_when_env_absent() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, r#"addr = "127.0.0.1:9000""#)?;
            let cfg = ServerConfig::load()?;
            assert_eq!(cfg.addr, "127.0.0.1:9000");
            Ok(())
        });
    }
}
