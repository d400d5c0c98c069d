// store.rs - sled trees for users, activation tokens and form submissions

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::{Db, Tree};

use crate::errors::{GateError, GateResult, SafeLock};

const FIRST_USER_ID: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationToken {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub id: u64,
    pub user_id: String,
    pub payload: Value,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Why a token could not be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationFailure {
    Unknown,
    Used,
    Expired,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: String,
    pub activated: bool,
}

pub struct AicwebStore {
    db: Db,
    users: Tree,
    by_email: Tree,
    by_username: Tree,
    tokens: Tree,
    forms: Tree,
    /// Serializes check-then-write sequences across trees.
    write_lock: Mutex<()>,
}

impl AicwebStore {
    pub fn open(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| GateError::io("create aicweb db dir", e))?;
        }
        let db = sled::open(path).map_err(|e| GateError::storage("open aicweb db", e))?;
        Ok(Self {
            users: db.open_tree("users")?,
            by_email: db.open_tree("users_by_email")?,
            by_username: db.open_tree("users_by_username")?,
            tokens: db.open_tree("activation_tokens")?,
            forms: db.open_tree("form_submissions")?,
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Insert a user. `Ok(None)` when the email is already registered.
    pub fn create_user(&self, new: NewUser<'_>) -> GateResult<Option<UserRecord>> {
        let email_key = new.email.to_lowercase();
        let _guard = self.write_lock.safe_lock()?;

        if self.by_email.contains_key(email_key.as_bytes())? {
            return Ok(None);
        }

        let id = (FIRST_USER_ID + self.db.generate_id()?).to_string();
        let user = UserRecord {
            id: id.clone(),
            email: new.email.to_string(),
            username: new.username.to_string(),
            password_hash: new.password_hash,
            activated: new.activated,
            created_at: Utc::now(),
        };

        self.users.insert(id.as_bytes(), serde_json::to_vec(&user)?)?;
        self.by_email.insert(email_key.as_bytes(), id.as_bytes())?;
        if !user.username.is_empty() && !self.by_username.contains_key(user.username.as_bytes())? {
            self.by_username.insert(user.username.as_bytes(), id.as_bytes())?;
        }
        self.db.flush()?;
        Ok(Some(user))
    }

    pub fn user_by_id(&self, id: &str) -> GateResult<Option<UserRecord>> {
        match self.users.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn user_by_email(&self, email: &str) -> GateResult<Option<UserRecord>> {
        self.user_by_index(&self.by_email, &email.to_lowercase())
    }

    pub fn user_by_username(&self, username: &str) -> GateResult<Option<UserRecord>> {
        self.user_by_index(&self.by_username, username)
    }

    fn user_by_index(&self, index: &Tree, key: &str) -> GateResult<Option<UserRecord>> {
        match index.get(key.as_bytes())? {
            Some(id) => self.user_by_id(&String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn create_activation_token(
        &self,
        user: &UserRecord,
        token: &str,
        ttl_hours: u32,
    ) -> GateResult<ActivationToken> {
        let now = Utc::now();
        let record = ActivationToken {
            token: token.to_string(),
            user_id: user.id.clone(),
            email: user.email.clone(),
            expires_at: now + Duration::hours(i64::from(ttl_hours)),
            used_at: None,
            created_at: now,
        };
        self.tokens.insert(token.as_bytes(), serde_json::to_vec(&record)?)?;
        self.db.flush()?;
        Ok(record)
    }

    /// Mark the token used and its user activated, in one step.
    pub fn redeem_activation_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> GateResult<Result<UserRecord, ActivationFailure>> {
        let _guard = self.write_lock.safe_lock()?;

        let Some(bytes) = self.tokens.get(token.as_bytes())? else {
            return Ok(Err(ActivationFailure::Unknown));
        };
        let mut record: ActivationToken = serde_json::from_slice(&bytes)?;
        if record.used_at.is_some() {
            return Ok(Err(ActivationFailure::Used));
        }
        if now > record.expires_at {
            return Ok(Err(ActivationFailure::Expired));
        }
        let Some(mut user) = self.user_by_id(&record.user_id)? else {
            return Ok(Err(ActivationFailure::Unknown));
        };

        user.activated = true;
        record.used_at = Some(now);
        self.users.insert(user.id.as_bytes(), serde_json::to_vec(&user)?)?;
        self.tokens.insert(token.as_bytes(), serde_json::to_vec(&record)?)?;
        self.db.flush()?;
        Ok(Ok(user))
    }

    pub fn insert_form(&self, user_id: &str, payload: Value, ip: &str, user_agent: &str) -> GateResult<FormSubmission> {
        let id = self.db.generate_id()?;
        let form = FormSubmission {
            id,
            user_id: user_id.to_string(),
            payload,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            created_at: Utc::now(),
        };
        self.forms.insert(form_key(user_id, id), serde_json::to_vec(&form)?)?;
        self.db.flush()?;
        Ok(form)
    }

    /// Newest first.
    pub fn list_forms(&self, user_id: &str, limit: usize) -> GateResult<Vec<FormSubmission>> {
        self.forms
            .scan_prefix(form_prefix(user_id))
            .take(limit)
            .map(|entry| -> GateResult<FormSubmission> {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }
}

fn form_prefix(user_id: &str) -> Vec<u8> {
    let mut key = user_id.as_bytes().to_vec();
    key.push(b'/');
    key
}

/// Inverted id so that lexical order is newest first.
fn form_key(user_id: &str, id: u64) -> Vec<u8> {
    let mut key = form_prefix(user_id);
    key.extend_from_slice(&(u64::MAX - id).to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn new_user<'a>(email: &'a str, username: &'a str) -> NewUser<'a> {
        NewUser {
            email,
            username,
            password_hash: "h".into(),
            activated: false,
        }
    }

    #[test]
    fn ids_start_at_ten_thousand_and_emails_are_unique() {
        let dir = tempdir().unwrap();
        let store = AicwebStore::open(dir.path().join("db")).unwrap();

        let a = store.create_user(new_user("A@example.com", "alice")).unwrap().unwrap();
        assert!(a.id.parse::<u64>().unwrap() >= 10_000);

        assert!(store.create_user(new_user("a@EXAMPLE.com", "other")).unwrap().is_none());
        let b = store.create_user(new_user("b@example.com", "bob")).unwrap().unwrap();
        assert!(b.id.parse::<u64>().unwrap() > a.id.parse::<u64>().unwrap());

        assert_eq!(store.user_by_email("a@example.com").unwrap().unwrap().id, a.id);
        assert_eq!(store.user_by_username("bob").unwrap().unwrap().id, b.id);
    }

    #[test]
    fn activation_tokens_are_single_use_and_expire() {
        let dir = tempdir().unwrap();
        let store = AicwebStore::open(dir.path().join("db")).unwrap();
        let user = store.create_user(new_user("c@example.com", "carol")).unwrap().unwrap();

        store.create_activation_token(&user, "tok1", 24).unwrap();
        let activated = store.redeem_activation_token("tok1", Utc::now()).unwrap().unwrap();
        assert!(activated.activated);
        assert_eq!(
            store.redeem_activation_token("tok1", Utc::now()).unwrap(),
            Err(ActivationFailure::Used)
        );

        store.create_activation_token(&user, "tok2", 1).unwrap();
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(
            store.redeem_activation_token("tok2", later).unwrap(),
            Err(ActivationFailure::Expired)
        );
        assert_eq!(
            store.redeem_activation_token("nope", Utc::now()).unwrap(),
            Err(ActivationFailure::Unknown)
        );
    }

    #[test]
    fn forms_list_newest_first_per_user() {
        let dir = tempdir().unwrap();
        let store = AicwebStore::open(dir.path().join("db")).unwrap();

        store.insert_form("10000", json!({"n": 1}), "1.1.1.1", "ua").unwrap();
        store.insert_form("10000", json!({"n": 2}), "1.1.1.1", "ua").unwrap();
        store.insert_form("100001", json!({"n": 99}), "1.1.1.1", "ua").unwrap();

        let list = store.list_forms("10000", 10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].payload["n"], 2);
        assert_eq!(store.list_forms("10000", 1).unwrap().len(), 1);
    }
}
