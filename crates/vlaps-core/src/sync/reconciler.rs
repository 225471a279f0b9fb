//! Converging local `synced` flags with the remote lap store.
//!
//! A pass flips every pending lap to synced up front, then delivers them in
//! ascending idx. Whatever was not confirmed delivered is flipped back, so a
//! failed pass leaves the session exactly as retryable as before.

use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::integrations::RemoteStore;
use crate::models::{Lap, LapDetailed};
use crate::storage::{Database, Store, TxnMode};
use crate::sync::types::{ReauthPolicy, SyncFailure, SyncReport};

const SYNC_STORES: [Store; 2] = [Store::Session, Store::Lap];

/// Run one reconciliation pass for a session.
///
/// Storage failures are returned as `Err`; remote failures end up in
/// [`SyncReport::failure`].
pub async fn reconcile<R: RemoteStore>(
    db: &mut Database,
    remote: &R,
    session_id: &str,
) -> Result<SyncReport, DatabaseError> {
    let before = {
        let mut txn = db.txn(&SYNC_STORES, TxnMode::ReadWrite)?;
        let before = txn.set_session_synced(session_id)?;
        txn.commit()?;
        before
    };
    let pending: Vec<LapDetailed> = before.unsynced_laps().cloned().collect();
    let mut report = SyncReport::new(
        session_id,
        pending.iter().map(|l| l.lap.id.clone()).collect(),
    );
    if pending.is_empty() {
        debug!(session_id, "nothing to sync");
        return Ok(report);
    }
    info!(session_id, pending = pending.len(), "reconciling session");

    let handle = match remote.ensure_authorized().await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(session_id, error = %e, "remote store not authorized");
            revert(db, &pending)?;
            report.failure = Some(SyncFailure::Auth(e));
            return Ok(report);
        }
    };

    for (i, lap) in pending.iter().enumerate() {
        match remote.append_lap(&handle, lap).await {
            Ok(()) => {
                debug!(lap_id = %lap.lap.id, idx = lap.lap.idx, "lap delivered");
                report.delivered.push(lap.lap.id.clone());
            }
            Err(error) => {
                warn!(lap_id = %lap.lap.id, idx = lap.lap.idx, error = %error, "lap delivery failed");
                revert(db, &pending[i..])?;
                report.failure = Some(SyncFailure::Delivery {
                    lap_id: lap.lap.id.clone(),
                    error,
                });
                return Ok(report);
            }
        }
    }

    info!(session_id, delivered = report.delivered.len(), "session synced");
    Ok(report)
}

/// Flip undelivered laps back to unsynced in one transaction.
///
/// If this fails the laps stay flagged synced without having been delivered,
/// and no later pass resends them; their ids are logged for manual recovery.
fn revert(db: &mut Database, laps: &[LapDetailed]) -> Result<(), DatabaseError> {
    let reverted = db.txn(&SYNC_STORES, TxnMode::ReadWrite).and_then(|mut txn| {
        for lap in laps {
            txn.put_lap(&Lap {
                synced: false,
                ..lap.lap.clone()
            })?;
        }
        txn.commit()
    });
    match reverted {
        Ok(()) => {
            debug!(reverted = laps.len(), "pending laps reverted");
            Ok(())
        }
        Err(error) => {
            let lap_ids: Vec<&str> = laps.iter().map(|l| l.lap.id.as_str()).collect();
            warn!(?lap_ids, %error, "undelivered laps left marked synced");
            Err(error)
        }
    }
}

/// [`reconcile`], retried after re-authorization when the remote rejects the
/// credentials or no spreadsheet exists yet. The stored token is invalidated
/// on every unauthorized pass; at most `policy.max_attempts`
/// re-authorizations are made.
pub async fn reconcile_with_reauth<R: RemoteStore>(
    db: &mut Database,
    remote: &R,
    session_id: &str,
    policy: ReauthPolicy,
) -> Result<SyncReport, DatabaseError> {
    let mut report = reconcile(db, remote, session_id).await?;

    while report
        .failure
        .as_ref()
        .is_some_and(SyncFailure::needs_reauthorization)
    {
        if report
            .failure
            .as_ref()
            .is_some_and(SyncFailure::is_unauthorized)
        {
            if let Err(e) = remote.invalidate_token() {
                warn!(error = %e, "could not remove stored token");
            }
        }
        if !policy.interactive || report.reauth_attempts >= policy.max_attempts {
            break;
        }

        report.reauth_attempts += 1;
        info!(session_id, attempt = report.reauth_attempts, "reauthorizing");
        if let Err(e) = remote.reauthorize().await {
            warn!(error = %e, "reauthorization failed");
            report.failure = Some(SyncFailure::Auth(e));
            break;
        }

        let next = reconcile(db, remote, session_id).await?;
        report.delivered.extend(next.delivered);
        report.failure = next.failure;
    }

    Ok(report)
}

/// Reconcile every session holding unsynced laps, oldest first.
///
/// An authorization failure stops the run since the remaining sessions
/// would fail the same way; delivery failures move on to the next session.
pub async fn reconcile_all<R: RemoteStore>(
    db: &mut Database,
    remote: &R,
    policy: ReauthPolicy,
) -> Result<Vec<SyncReport>, DatabaseError> {
    let session_ids = {
        let txn = db.txn(&SYNC_STORES, TxnMode::ReadOnly)?;
        txn.sessions_with_pending_laps()?
    };

    let mut reports = Vec::with_capacity(session_ids.len());
    for session_id in session_ids {
        let report = reconcile_with_reauth(db, remote, &session_id, policy).await?;
        let stop = matches!(report.failure, Some(SyncFailure::Auth(_)));
        reports.push(report);
        if stop {
            warn!("stopping sync run after authorization failure");
            break;
        }
    }
    Ok(reports)
}
