//! Crate-wide error type for the storage and service layers.
//!
//! Feature modules keep their own small enums for request-level failures and
//! wrap [`GateError`] for everything that comes from sled, disk or the network.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("config: {message}")]
    Config { message: String },

    #[error("storage {operation}: {source}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("serialize {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("auth: {message}")]
    Auth { message: String },

    #[error("lock poisoned: {resource}")]
    LockPoisoned { resource: String },

    #[error("io {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("network {operation}: {source}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("internal: {message}")]
    Internal { message: String },

    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String },
}

pub type GateResult<T> = Result<T, GateError>;

impl GateError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn network(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GateError::Config { .. } | GateError::Serialization { .. } | GateError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }
            GateError::Auth { .. } => StatusCode::UNAUTHORIZED,
            GateError::NotFound { .. } => StatusCode::NOT_FOUND,
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::Network { .. } => StatusCode::BAD_GATEWAY,
            GateError::Storage { .. }
            | GateError::LockPoisoned { .. }
            | GateError::Io { .. }
            | GateError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Lock helpers that turn poisoning into a [`GateError`] instead of a panic.
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self) -> GateResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> GateResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| GateError::LockPoisoned {
            resource: "mutex".to_string(),
        })
    }
}

pub trait SafeReadLock<T: ?Sized> {
    fn safe_read(&self) -> GateResult<std::sync::RwLockReadGuard<'_, T>>;
}

impl<T: ?Sized> SafeReadLock<T> for std::sync::RwLock<T> {
    fn safe_read(&self) -> GateResult<std::sync::RwLockReadGuard<'_, T>> {
        self.read().map_err(|_| GateError::LockPoisoned {
            resource: "rwlock_read".to_string(),
        })
    }
}

pub trait SafeWriteLock<T: ?Sized> {
    fn safe_write(&self) -> GateResult<std::sync::RwLockWriteGuard<'_, T>>;
}

impl<T: ?Sized> SafeWriteLock<T> for std::sync::RwLock<T> {
    fn safe_write(&self) -> GateResult<std::sync::RwLockWriteGuard<'_, T>> {
        self.write().map_err(|_| GateError::LockPoisoned {
            resource: "rwlock_write".to_string(),
        })
    }
}

impl From<sled::Error> for GateError {
    fn from(err: sled::Error) -> Self {
        GateError::storage("sled_operation", err)
    }
}

impl From<sled::transaction::TransactionError<GateError>> for GateError {
    fn from(err: sled::transaction::TransactionError<GateError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => GateError::storage("sled_transaction", e),
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::serialization("json_operation", err)
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::io("io_operation", err)
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::network("http_request", err)
    }
}

impl From<figment::Error> for GateError {
    fn from(err: figment::Error) -> Self {
        GateError::config(err.to_string())
    }
}

impl From<String> for GateError {
    fn from(err: String) -> Self {
        GateError::Internal { message: err }
    }
}
