//! Core error types for vlaps-core.
//!
//! Every concern gets its own thiserror enum; [`CoreError`] composes them so
//! callers can propagate anything with `?`.

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::Store;

/// Core error type for vlaps-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Local store errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote store could not be authorized
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    /// A lap could not be delivered to the remote store
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// OAuth-related errors
    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local store errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// No record with the given key in the store
    #[error("No record '{key}' in store '{store}'")]
    NotFound { store: Store, key: String },

    /// Failed to open the database file
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The storage engine failed; the transaction was not committed
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// The transaction was opened without this store in scope
    #[error("Store '{store}' is not part of this transaction")]
    StoreNotInScope { store: Store },

    /// Write attempted in a read-only transaction
    #[error("Cannot write to store '{store}' in a read-only transaction")]
    ReadOnly { store: Store },

    /// A new lap must come strictly after the last recorded one
    #[error("Lap idx {idx} for session {session_id} must be greater than {last_idx}")]
    OutOfOrderLap {
        session_id: String,
        idx: u32,
        last_idx: u32,
    },

    /// A recorded lap cannot move within its session
    #[error("Lap {lap_id} already recorded with a different idx")]
    LapIdxChanged { lap_id: String },

    /// The lap spans more intervals than an idx can count
    #[error("Lap of {seconds} s after idx {last_idx} in session {session_id} is out of range")]
    IdxOverflow {
        session_id: String,
        last_idx: u32,
        seconds: f64,
    },

    /// Settings values out of range
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// The data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Failures acquiring a remote store handle.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No token has ever been stored
    #[error("Not authenticated with Google Sheets")]
    NotAuthenticated,

    /// Token expired and could not be refreshed silently
    #[error("Access token expired and no refresh token available")]
    TokenExpired,

    /// No spreadsheet has been provisioned yet
    #[error("No lap spreadsheet configured, log in first")]
    SpreadsheetMissing,

    /// The remote rejected the stored token (it has been removed)
    #[error("Access to the spreadsheet was denied")]
    Unauthorized,

    /// The spreadsheet could not be reached
    #[error("Spreadsheet not available: {0}")]
    Unavailable(String),

    /// OAuth client id/secret are missing
    #[error("OAuth client credentials not configured, run `vlaps auth credentials`")]
    CredentialsNotConfigured,

    /// The interactive consent flow failed
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    /// The credential store failed
    #[error("Credential store error: {0}")]
    Keyring(String),
}

impl AuthError {
    /// Whether the stored token is missing or no longer accepted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthorized | AuthError::NotAuthenticated | AuthError::TokenExpired
        )
    }

    /// Whether a fresh consent flow could fix this failure. Logging in also
    /// provisions the spreadsheet, so a missing sheet qualifies; missing
    /// client credentials do not.
    pub fn needs_reauthorization(&self) -> bool {
        self.is_unauthorized() || matches!(self, AuthError::SpreadsheetMissing)
    }
}

/// Failures delivering a single lap row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// The token was rejected mid-stream
    #[error("Unauthorized")]
    Unauthorized,

    /// Network, quota or server trouble; retry later
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Anything else the remote store complained about
    #[error("{0}")]
    Other(String),
}

impl DeliveryError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DeliveryError::Unauthorized)
    }
}

/// OAuth-specific errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Authorization failed
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Token refresh failed
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// Callback timeout
    #[error("OAuth callback timeout: no callback received within {timeout_secs} seconds")]
    CallbackTimeout { timeout_secs: u64 },

    /// Invalid callback
    #[error("Invalid OAuth callback: {0}")]
    InvalidCallback(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                DatabaseError::Locked
            }
            _ => DatabaseError::StorageFailure(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<tokio::time::error::Elapsed> for OAuthError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        OAuthError::CallbackTimeout {
            timeout_secs: crate::integrations::oauth::CALLBACK_TIMEOUT_SECS,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            DeliveryError::Transient(err.to_string())
        } else {
            DeliveryError::Other(err.to_string())
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
