//! Outcome types of a reconciliation pass.

use std::fmt;

use crate::error::{AuthError, DeliveryError};
use crate::models::SessionDetailed;
use crate::storage::SyncConfig;

/// Why a pass stopped before delivering its whole pending set.
#[derive(Debug)]
pub enum SyncFailure {
    /// No handle could be acquired; nothing was delivered.
    Auth(AuthError),
    /// Delivery of `lap_id` failed; it and every later pending lap stay unsynced.
    Delivery { lap_id: String, error: DeliveryError },
}

impl SyncFailure {
    /// Whether the remote rejected (or never had) a token.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SyncFailure::Auth(e) => e.is_unauthorized(),
            SyncFailure::Delivery { error, .. } => error.is_unauthorized(),
        }
    }

    /// Whether a fresh authorization could fix this failure.
    pub fn needs_reauthorization(&self) -> bool {
        match self {
            SyncFailure::Auth(e) => e.needs_reauthorization(),
            SyncFailure::Delivery { error, .. } => error.is_unauthorized(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailure::Auth(e) => write!(f, "{e}"),
            SyncFailure::Delivery { lap_id, error } => {
                write!(f, "delivery of lap {lap_id} failed: {error}")
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub session_id: String,
    /// Laps unsynced when the pass began, ascending idx.
    pub pending: Vec<String>,
    /// Laps confirmed written to the remote store, in delivery order.
    pub delivered: Vec<String>,
    pub failure: Option<SyncFailure>,
    /// Re-authorizations performed before the final pass.
    pub reauth_attempts: u32,
}

impl SyncReport {
    pub fn new(session_id: impl Into<String>, pending: Vec<String>) -> Self {
        Self {
            session_id: session_id.into(),
            pending,
            ..Self::default()
        }
    }

    /// True when the whole pending set reached the remote store.
    pub fn is_synced(&self) -> bool {
        self.failure.is_none()
    }

    /// Pending laps that are unsynced again after the pass.
    pub fn remaining(&self) -> usize {
        self.pending.len().saturating_sub(self.delivered.len())
    }
}

/// Caller-driven retry after the remote rejects the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReauthPolicy {
    pub max_attempts: u32,
    /// Whether `reauthorize` may be called at all; it usually opens a browser.
    pub interactive: bool,
}

impl Default for ReauthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            interactive: true,
        }
    }
}

impl ReauthPolicy {
    /// Never reauthorize; unauthorized passes are reported as they are.
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            interactive: false,
        }
    }
}

impl From<&SyncConfig> for ReauthPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_reauth_attempts,
            interactive: config.reauthorize_interactively,
        }
    }
}

/// Sync state of one session. There is no terminal failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    AllSynced,
    HasPending,
}

impl SyncState {
    pub fn of(session: &SessionDetailed) -> Self {
        if session.synced() {
            SyncState::AllSynced
        } else {
            SyncState::HasPending
        }
    }
}
