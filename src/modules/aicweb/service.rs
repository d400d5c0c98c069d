// service.rs - accounts, sessions and activation for the aicweb demo

use std::collections::HashMap;
use std::sync::RwLock;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::dto::AicwebError;
use super::store::{ActivationFailure, ActivationToken, AicwebStore, NewUser, UserRecord};
use crate::errors::{GateResult, SafeReadLock, SafeWriteLock};

pub const DEFAULT_TTL_HOURS: u32 = 24;
pub const MAX_TTL_HOURS: u32 = 168;

/// Out-of-range values fall back to the default rather than being clamped.
pub fn effective_ttl_hours(raw: u32) -> u32 {
    if (1..=MAX_TTL_HOURS).contains(&raw) {
        raw
    } else {
        DEFAULT_TTL_HOURS
    }
}

pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill(buf.as_mut_slice());
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// `sha256$<salt b64>$<digest hex>`; not a password KDF.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill(&mut salt);
    format!("sha256${}${}", B64.encode(salt), salted_digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some("sha256"), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    match B64.decode(salt) {
        Ok(salt) => salted_digest(&salt, password) == digest,
        Err(_) => false,
    }
}

fn salted_digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A freshly registered account and, when activation is required, its token.
pub struct Registration {
    pub user: UserRecord,
    pub activation: Option<ActivationToken>,
}

pub struct AuthService {
    store: AicwebStore,
    sessions: RwLock<HashMap<String, String>>,
    require_activation: bool,
    ttl_hours: u32,
}

impl AuthService {
    pub fn new(store: AicwebStore, require_activation: bool, ttl_hours: u32) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
            require_activation,
            ttl_hours: effective_ttl_hours(ttl_hours),
        }
    }

    pub fn store(&self) -> &AicwebStore {
        &self.store
    }

    pub fn require_activation(&self) -> bool {
        self.require_activation
    }

    pub fn ttl_hours(&self) -> u32 {
        self.ttl_hours
    }

    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<Registration, AicwebError> {
        let (username, email) = (username.trim(), email.trim());
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AicwebError::reason("username, email and password are required"));
        }

        let created = self.store.create_user(NewUser {
            email,
            username,
            password_hash: hash_password(password),
            activated: !self.require_activation,
        })?;
        let Some(user) = created else {
            return Err(AicwebError::EmailInUse);
        };

        let activation = if self.require_activation {
            let token = random_hex(32);
            Some(self.store.create_activation_token(&user, &token, self.ttl_hours)?)
        } else {
            None
        };

        info!(module = "aicweb", user_id = %user.id, activation = activation.is_some(), "user registered");
        Ok(Registration { user, activation })
    }

    /// Looks the account up by email first, then by username.
    pub fn login(&self, username: &str, email: &str, password: &str) -> Result<String, AicwebError> {
        let (username, email) = (username.trim(), email.trim());
        if password.is_empty() || (username.is_empty() && email.is_empty()) {
            return Err(AicwebError::reason("credentials are required"));
        }

        let user = if !email.is_empty() {
            self.store.user_by_email(email)?
        } else {
            // Older clients send the email in the username field.
            match self.store.user_by_username(username)? {
                Some(user) => Some(user),
                None if username.contains('@') => self.store.user_by_email(username)?,
                None => None,
            }
        };

        let user = match user {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => return Err(AicwebError::Unauthorized),
        };
        if self.require_activation && !user.activated {
            return Err(AicwebError::NotActivated);
        }

        let token = random_hex(32);
        self.sessions.safe_write()?.insert(token.clone(), user.id.clone());
        debug!(module = "aicweb", user_id = %user.id, "session issued");
        Ok(token)
    }

    pub fn activate(&self, token: &str) -> Result<UserRecord, AicwebError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AicwebError::reason("missing token"));
        }
        match self.store.redeem_activation_token(token, Utc::now())? {
            Ok(user) => {
                info!(module = "aicweb", user_id = %user.id, "account activated");
                Ok(user)
            }
            Err(ActivationFailure::Unknown) => Err(AicwebError::reason("invalid token")),
            Err(ActivationFailure::Used) => Err(AicwebError::reason("token already used")),
            Err(ActivationFailure::Expired) => Err(AicwebError::reason("token expired")),
        }
    }

    /// Resolve a bearer token to its user.
    pub fn authenticate(&self, token: &str) -> GateResult<Option<UserRecord>> {
        let user_id = self.sessions.safe_read()?.get(token).cloned();
        match user_id {
            Some(id) => self.store.user_by_id(&id),
            None => Ok(None),
        }
    }
}
