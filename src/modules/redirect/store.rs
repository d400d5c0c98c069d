use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::errors::{GateError, GateResult};

const RULES_TREE: &str = "redirect_rules";
const CARDS_TREE: &str = "nfc_cards";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRule {
    pub name: String,
    pub target_url: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfcCard {
    pub hwid: String,
    pub is_registered: bool,
    pub user_id: String,
    pub updated_at: DateTime<Utc>,
}

/// sled-backed rules and NFC cards. Both trees are upsert-only.
#[derive(Clone)]
pub struct RedirectStore {
    db: Db,
    rules: Tree,
    cards: Tree,
}

impl RedirectStore {
    pub fn open(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| GateError::io("create redirect db dir", e))?;
        }
        let db = sled::open(path).map_err(|e| GateError::storage("open redirect db", e))?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> GateResult<Self> {
        let rules = db.open_tree(RULES_TREE)?;
        let cards = db.open_tree(CARDS_TREE)?;
        Ok(Self { db, rules, cards })
    }

    pub fn get_rule(&self, name: &str) -> GateResult<Option<RedirectRule>> {
        match self.rules.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn upsert_rule(&self, name: &str, target_url: &str, enabled: bool) -> GateResult<RedirectRule> {
        let rule = RedirectRule {
            name: name.to_string(),
            target_url: target_url.to_string(),
            enabled,
            updated_at: Utc::now(),
        };
        self.rules.insert(name.as_bytes(), serde_json::to_vec(&rule)?)?;
        self.db.flush()?;
        Ok(rule)
    }

    pub fn get_card(&self, hwid: &str) -> GateResult<Option<NfcCard>> {
        match self.cards.get(hwid.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn upsert_card(&self, hwid: &str, is_registered: bool, user_id: &str) -> GateResult<NfcCard> {
        let card = NfcCard {
            hwid: hwid.to_string(),
            is_registered,
            user_id: user_id.to_string(),
            updated_at: Utc::now(),
        };
        self.cards.insert(hwid.as_bytes(), serde_json::to_vec(&card)?)?;
        self.db.flush()?;
        Ok(card)
    }
}
