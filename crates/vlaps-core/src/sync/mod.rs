//! Offline-first synchronization of recorded laps to the remote store.
//!
//! Laps are always written locally first with `synced = false`; a
//! reconciliation pass later pushes them out and records which ones made it.

pub mod reconciler;
pub mod types;


pub use reconciler::{reconcile, reconcile_all, reconcile_with_reauth};
pub use types::{ReauthPolicy, SyncFailure, SyncReport, SyncState};
