use tracing::debug;

use super::store::RedirectStore;
use super::RedirectConfig;
use crate::errors::GateResult;

const FALLBACK_NOT_FOUND: &str = "https://koch2333.cn/404?name={name}";
const FALLBACK_NFC_REGISTERED: &str = "https://koch2333.cn/pncs/ok?uid={userId}&hwid={hwid}";
const FALLBACK_NFC_UNREGISTERED: &str = "https://koch2333.cn/pncs/register?hwid={hwid}";

/// Where a name lookup ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub url: String,
    /// True when an enabled rule matched, false for the not-found template.
    pub hit: bool,
}

pub struct RedirectService {
    store: RedirectStore,
    not_found_url: String,
    nfc_registered_url: String,
    nfc_unregistered_url: String,
}

impl RedirectService {
    pub fn new(store: RedirectStore, config: &RedirectConfig) -> Self {
        Self {
            store,
            not_found_url: or_fallback(&config.not_found_url, FALLBACK_NOT_FOUND),
            nfc_registered_url: or_fallback(&config.nfc_registered_url, FALLBACK_NFC_REGISTERED),
            nfc_unregistered_url: or_fallback(&config.nfc_unregistered_url, FALLBACK_NFC_UNREGISTERED),
        }
    }

    pub fn store(&self) -> &RedirectStore {
        &self.store
    }

    pub fn resolve_by_name(&self, name: &str) -> GateResult<Resolution> {
        if let Some(rule) = self.store.get_rule(name)? {
            if rule.enabled && !rule.target_url.is_empty() {
                return Ok(Resolution {
                    url: rule.target_url,
                    hit: true,
                });
            }
            debug!(name = %name, "rule disabled, using not-found template");
        }
        Ok(Resolution {
            url: expand(&self.not_found_url, &[("name", name)]),
            hit: false,
        })
    }

    pub fn resolve_nfc(&self, hwid: &str) -> GateResult<String> {
        match self.store.get_card(hwid)? {
            Some(card) if card.is_registered => Ok(expand(
                &self.nfc_registered_url,
                &[("hwid", &card.hwid), ("userId", &card.user_id), ("registered", "true")],
            )),
            _ => Ok(expand(
                &self.nfc_unregistered_url,
                &[("hwid", hwid), ("registered", "false")],
            )),
        }
    }
}

fn or_fallback(template: &str, fallback: &str) -> String {
    if template.trim().is_empty() {
        fallback.to_string()
    } else {
        template.trim().to_string()
    }
}

/// Replace every `{key}` with its value; unknown placeholders stay as written.
pub fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |out, (key, value)| {
        out.replace(&format!("{{{key}}}"), value)
    })
}
