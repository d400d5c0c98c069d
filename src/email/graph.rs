// graph.rs - Microsoft Graph sendMail via client-credentials

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{EmailConfig, EmailError, EmailSender, OutgoingEmail};

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphCloud {
    Global,
    /// Operated by 21Vianet.
    China,
}

impl GraphCloud {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cn" | "china" | "21vianet" => GraphCloud::China,
            _ => GraphCloud::Global,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GraphCloud::Global => "global",
            GraphCloud::China => "cn",
        }
    }

    pub fn token_base(self) -> &'static str {
        match self {
            GraphCloud::Global => "https://login.microsoftonline.com",
            GraphCloud::China => "https://login.chinacloudapi.cn",
        }
    }

    pub fn graph_base(self) -> &'static str {
        match self {
            GraphCloud::Global => "https://graph.microsoft.com",
            GraphCloud::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }

    pub fn scope(self) -> String {
        format!("{}/.default", self.graph_base())
    }
}

pub struct GraphSender {
    tenant: String,
    client_id: String,
    secret: String,
    /// Object id when configured, else the UPN.
    from: String,
    cloud: GraphCloud,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl GraphSender {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self, EmailError> {
        let required = |v: &Option<String>, key: &str| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| EmailError::Config(format!("{key} is not set")))
        };
        let tenant = required(&cfg.graph_tenant_id, "GRAPH_TENANT_ID")?;
        let client_id = required(&cfg.graph_client_id, "GRAPH_CLIENT_ID")?;
        let secret = required(&cfg.graph_client_secret, "GRAPH_CLIENT_SECRET")?;
        let from = required(&cfg.graph_from_id, "GRAPH_FROM_ID")
            .or_else(|_| required(&cfg.graph_from_upn, "GRAPH_FROM_UPN"))
            .map_err(|_| EmailError::Config("GRAPH_FROM_ID or GRAPH_FROM_UPN is not set".into()))?;

        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            tenant,
            client_id,
            secret,
            from,
            cloud: GraphCloud::parse(&cfg.graph_cloud),
            client,
        })
    }

    pub fn cloud(&self) -> GraphCloud {
        self.cloud
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.cloud.token_base(),
            encode_segment(&self.tenant)
        )
    }

    pub fn send_url(&self) -> String {
        format!(
            "{}/v1.0/users/{}/sendMail",
            self.cloud.graph_base(),
            encode_segment(&self.from)
        )
    }

    async fn fetch_token(&self) -> Result<String, EmailError> {
        let scope = self.cloud.scope();
        let res = self
            .client
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body: TokenResponse = res
            .json()
            .await
            .map_err(|e| EmailError::Token(format!("decode token response: {e}")))?;

        if body.access_token.is_empty() {
            if !body.error.is_empty() {
                return Err(EmailError::Token(format!(
                    "{} ({})",
                    body.error, body.error_description
                )));
            }
            return Err(EmailError::Token(format!("empty access_token, status={status}")));
        }
        Ok(body.access_token)
    }
}

/// Request body for `sendMail`. HTML wins over text when both are present.
pub(crate) fn send_mail_payload(email: &OutgoingEmail) -> Value {
    let (content_type, content) = if email.html.trim().is_empty() {
        ("Text", email.text.as_str())
    } else {
        ("HTML", email.html.as_str())
    };
    json!({
        "message": {
            "subject": email.subject,
            "body": { "contentType": content_type, "content": content },
            "toRecipients": [ { "emailAddress": { "address": email.to } } ],
        },
        "saveToSentItems": true,
    })
}

/// Percent-encode one path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'@' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl EmailSender for GraphSender {
    fn name(&self) -> &'static str {
        "graph"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let token = self.fetch_token().await.inspect_err(|e| {
            warn!(error = %e, "graph token request failed");
        })?;

        let res = self
            .client
            .post(self.send_url())
            .bearer_auth(token)
            .json(&send_mail_payload(email))
            .send()
            .await?;

        let status = res.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let body = res.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "graph sendMail rejected");
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(to = %email.to, subject = %email.subject, "graph mail sent");
        Ok(())
    }
}
