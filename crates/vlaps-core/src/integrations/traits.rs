use async_trait::async_trait;

use crate::error::{AuthError, DeliveryError};
use crate::models::LapDetailed;

/// An append-only lap sink that the reconciler pushes unsynced laps into.
///
/// Implementations keep their own credentials; `ensure_authorized` turns
/// them into a handle that every `append_lap` call of one pass reuses.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    type Handle: Send + Sync;

    /// Verify the stored credentials against the remote and return a handle.
    async fn ensure_authorized(&self) -> Result<Self::Handle, AuthError>;

    /// Append one lap as a new row. Not idempotent.
    async fn append_lap(&self, handle: &Self::Handle, lap: &LapDetailed)
        -> Result<(), DeliveryError>;

    /// Forget the stored token so the next authorization starts over.
    fn invalidate_token(&self) -> Result<(), AuthError>;

    /// Obtain fresh credentials, interactively if needed.
    async fn reauthorize(&self) -> Result<(), AuthError>;
}
