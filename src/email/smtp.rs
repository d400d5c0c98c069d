// smtp.rs - authenticated SMTP submission

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{EmailConfig, EmailError, EmailSender, OutgoingEmail};

pub const DEFAULT_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;
const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SmtpSender {
    host: String,
    port: u16,
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    /// Every `SMTP_*` value is required and the port must be non-zero.
    pub fn from_config(cfg: &EmailConfig) -> Result<Self, EmailError> {
        let required = |v: &Option<String>, key: &str| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| EmailError::Config(format!("{key} is not set")))
        };
        let host = required(&cfg.smtp_host, "SMTP_HOST")?;
        let username = required(&cfg.smtp_username, "SMTP_USERNAME")?;
        let password = required(&cfg.smtp_password, "SMTP_PASSWORD")?;
        let from = required(&cfg.smtp_from, "SMTP_FROM")?;
        if cfg.smtp_port == 0 {
            return Err(EmailError::Config("SMTP_PORT is not set".into()));
        }
        let from: Mailbox = from
            .parse()
            .map_err(|e| EmailError::Config(format!("SMTP_FROM {from:?}: {e}")))?;

        let builder = if cfg.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        }
        .map_err(|e| EmailError::Config(format!("SMTP_HOST {host:?}: {e}")))?;
        let transport = builder
            .port(cfg.smtp_port)
            .credentials(Credentials::new(username, password))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self {
            host,
            port: cfg.smtp_port,
            from,
            transport,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn implicit_tls(&self) -> bool {
        self.port == IMPLICIT_TLS_PORT
    }

    /// HTML body when present, plain text otherwise.
    pub fn message(&self, email: &OutgoingEmail) -> Result<Message, EmailError> {
        let to: Mailbox = email
            .to
            .trim()
            .parse()
            .map_err(|e| EmailError::Smtp(format!("recipient {:?}: {e}", email.to)))?;
        let (content_type, body) = if email.html.is_empty() {
            (ContentType::TEXT_PLAIN, email.text.clone())
        } else {
            (ContentType::TEXT_HTML, email.html.clone())
        };
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(content_type)
            .body(body)
            .map_err(|e| EmailError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = self.message(email)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| EmailError::Smtp(e.to_string()))?;
        info!(
            host = %self.host,
            port = self.port,
            code = %response.code(),
            "email sent via smtp"
        );
        Ok(())
    }
}
