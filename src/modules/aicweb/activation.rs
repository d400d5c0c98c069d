//! Delivery of activation links: an append-only debug file plus the
//! configured email sender. Delivery failures never fail registration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::email::{EmailSender, OutgoingEmail};

pub struct ActivationNotifier {
    base_url: String,
    debug_file: Option<PathBuf>,
    sender: Arc<dyn EmailSender>,
}

impl ActivationNotifier {
    pub fn new(base_url: &str, debug_file: Option<PathBuf>, sender: Arc<dyn EmailSender>) -> Self {
        Self {
            base_url: base_url.trim().to_string(),
            debug_file,
            sender,
        }
    }

    pub fn link(&self, token: &str) -> String {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.base_url, sep, token)
    }

    pub async fn notify(&self, to: &str, token: &str) {
        let link = self.link(token);

        if let Some(path) = &self.debug_file {
            if let Err(e) = append_line(path, to, token, &link).await {
                warn!(module = "aicweb", path = %path.display(), error = %e, "activation debug write failed");
            }
        }

        let mail = OutgoingEmail {
            to: to.to_string(),
            subject: "Activate your account".to_string(),
            html: format!("<p>Welcome!</p><p><a href=\"{link}\">Click here to activate your account</a>.</p>"),
            text: format!("Open this link to activate your account: {link}"),
        };
        match self.sender.send(&mail).await {
            Ok(()) => info!(module = "aicweb", sender = self.sender.name(), "activation email sent"),
            Err(e) => warn!(module = "aicweb", sender = self.sender.name(), error = %e, "activation email failed"),
        }
    }
}

async fn append_line(path: &Path, to: &str, token: &str, link: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let line = format!("{}\t{}\t{}\t{}\n", Utc::now().to_rfc3339(), to, token, link);
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
