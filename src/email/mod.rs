//! Outgoing email strategies.
//!
//! `EMAIL_STRATEGY` picks one of `none` (default), `log`, `smtp` or `graph`. Anything
//! that cannot be built from the available configuration degrades to `none`
//! with a warning, so callers always get a usable sender.

mod graph;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use figment::providers::Env;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::envinit::{self, de, mask};

pub use graph::{GraphCloud, GraphSender};
pub use smtp::SmtpSender;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("email is not configured: {0}")]
    Config(String),
    #[error("token request failed: {0}")]
    Token(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail service answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("smtp delivery failed: {0}")]
    Smtp(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

/// Drops every message.
pub struct NoneSender;

#[async_trait]
impl EmailSender for NoneSender {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn send(&self, _email: &OutgoingEmail) -> Result<(), EmailError> {
        Ok(())
    }
}

/// Logs a one-line summary instead of sending.
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            html_bytes = email.html.len(),
            text_bytes = email.text.len(),
            "email (log strategy)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(deserialize_with = "de::string")]
    pub email_strategy: String,
    #[serde(deserialize_with = "de::string")]
    pub graph_cloud: String,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub graph_tenant_id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub graph_client_id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub graph_client_secret: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub graph_from_upn: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub graph_from_id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    /// 465 means implicit TLS; any other port upgrades with STARTTLS.
    pub smtp_port: u16,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub smtp_password: Option<String>,
    /// Mailbox, e.g. `No Reply <noreply@example.com>`.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub smtp_from: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            email_strategy: "none".to_string(),
            graph_cloud: "global".to_string(),
            graph_tenant_id: None,
            graph_client_id: None,
            graph_client_secret: None,
            graph_from_upn: None,
            graph_from_id: None,
            smtp_host: None,
            smtp_port: smtp::DEFAULT_PORT,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
        }
    }
}

const ENV_KEYS: &[&str] = &[
    "EMAIL_STRATEGY",
    "GRAPH_CLOUD",
    "GRAPH_TENANT_ID",
    "GRAPH_CLIENT_ID",
    "GRAPH_CLIENT_SECRET",
    "GRAPH_FROM_UPN",
    "GRAPH_FROM_ID",
    "SMTP_HOST",
    "SMTP_PORT",
    "SMTP_USERNAME",
    "SMTP_PASSWORD",
    "SMTP_FROM",
];

impl EmailConfig {
    /// `config/email/module.toml`, `local.toml`, then the raw `EMAIL_*` / `GRAPH_*` / `SMTP_*` variables.
    pub fn load() -> Self {
        let env = Env::raw().only(ENV_KEYS);
        let mut cfg = match envinit::load::<EmailConfig, _>("email", "Email delivery config.", env) {
            Ok(loaded) => loaded.value,
            Err(e) => {
                warn!(error = %e, "email config unavailable; using defaults");
                EmailConfig::default()
            }
        };
        cfg.normalize();
        cfg.log_summary();
        cfg
    }

    fn normalize(&mut self) {
        self.email_strategy = lower_or(&self.email_strategy, "none");
        self.graph_cloud = lower_or(&self.graph_cloud, "global");
        for field in [
            &mut self.graph_tenant_id,
            &mut self.graph_client_id,
            &mut self.graph_client_secret,
            &mut self.graph_from_upn,
            &mut self.graph_from_id,
            &mut self.smtp_host,
            &mut self.smtp_username,
            &mut self.smtp_password,
            &mut self.smtp_from,
        ] {
            *field = field.take().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        }
    }

    fn log_summary(&self) {
        let opt = |v: &Option<String>| mask(v.as_deref().unwrap_or_default());
        info!(
            strategy = %self.email_strategy,
            cloud = %self.graph_cloud,
            tenant = %opt(&self.graph_tenant_id),
            client_id = %opt(&self.graph_client_id),
            client_secret = %opt(&self.graph_client_secret),
            "email config"
        );
        match &self.graph_from_id {
            Some(id) => info!(from_id = %mask(id), "email sender identity (object id)"),
            None => info!(from_upn = ?self.graph_from_upn, "email sender identity (upn)"),
        }
        info!(
            host = ?self.smtp_host,
            port = self.smtp_port,
            username = ?self.smtp_username,
            password = %opt(&self.smtp_password),
            from = ?self.smtp_from,
            "smtp settings"
        );
    }
}

fn lower_or(value: &str, default: &str) -> String {
    let v = value.trim();
    if v.is_empty() {
        default.to_string()
    } else {
        v.to_ascii_lowercase()
    }
}

/// Build the sender selected by `cfg`.
pub fn sender_from_config(cfg: &EmailConfig) -> Arc<dyn EmailSender> {
    match cfg.email_strategy.trim().to_ascii_lowercase().as_str() {
        "log" => Arc::new(LogSender),
        "graph" => match GraphSender::from_config(cfg) {
            Ok(sender) => {
                info!(cloud = sender.cloud().name(), "email strategy: graph");
                Arc::new(sender)
            }
            Err(e) => {
                warn!(error = %e, "graph email unavailable; trying smtp");
                smtp_or_none(cfg)
            }
        },
        "smtp" => smtp_or_none(cfg),
        "" | "none" => Arc::new(NoneSender),
        other => {
            warn!(strategy = %other, "unknown email strategy; falling back to none");
            Arc::new(NoneSender)
        }
    }
}

fn smtp_or_none(cfg: &EmailConfig) -> Arc<dyn EmailSender> {
    match SmtpSender::from_config(cfg) {
        Ok(sender) => {
            info!(host = %sender.host(), port = sender.port(), "email strategy: smtp");
            Arc::new(sender)
        }
        Err(e) => {
            warn!(error = %e, "smtp email unavailable; falling back to none");
            Arc::new(NoneSender)
        }
    }
}

/// Load email config and build the configured sender.
pub fn sender_from_env() -> Arc<dyn EmailSender> {
    sender_from_config(&EmailConfig::load())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures messages instead of sending them.
    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}
