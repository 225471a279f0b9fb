//! # VLaps Core Library
//!
//! Offline-first lap recording for pool swimmers. Every lap is written to a
//! local SQLite store first and synchronized to a Google Sheets spreadsheet
//! later, whenever a connection and a valid authorization are available.
//!
//! ## Architecture
//!
//! - **Storage**: transactional SQLite store of settings, sessions and laps,
//!   plus TOML-based configuration
//! - **Aggregation**: pure running totals over a session's laps
//! - **Recorder**: turns a lap-end tap into a lap with the right idx
//! - **Sync**: optimistic flip, ordered delivery, revert on failure
//! - **Integrations**: the remote store contract and its Google Sheets adapter
//!
//! ## Key Components
//!
//! - [`Database`] / [`Txn`]: scoped transactions over the local store
//! - [`detail`]: the aggregation engine
//! - [`reconcile`]: one synchronization pass for a session
//! - [`RemoteStore`]: trait for lap sinks, implemented by [`GoogleSheetsStore`]

pub mod aggregate;
pub mod error;
pub mod events;
pub mod integrations;
pub mod models;
pub mod recorder;
pub mod storage;
pub mod sync;

pub use aggregate::detail;
pub use error::{AuthError, ConfigError, CoreError, DatabaseError, DeliveryError, OAuthError};
pub use events::{SettingsObservers, SettingsSubscription};
pub use integrations::{
    CredentialStore, GoogleSheetsStore, KeyringCredentials, MemoryCredentials, RemoteStore,
    SheetHandle,
};
pub use models::{Lap, LapDetailed, LapTotals, Session, SessionDetailed, Settings};
pub use recorder::{next_lap, record_lap, LapClock};
pub use storage::{Config, Database, Store, Txn, TxnMode};
pub use sync::{
    reconcile, reconcile_all, reconcile_with_reauth, ReauthPolicy, SyncFailure, SyncReport,
    SyncState,
};
