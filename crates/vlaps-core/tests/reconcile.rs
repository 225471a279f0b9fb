//! Reconciliation against an in-process remote store.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use vlaps_core::error::{AuthError, DatabaseError, DeliveryError, OAuthError};
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::MakeWriter;
use vlaps_core::{
    reconcile, reconcile_all, reconcile_with_reauth, record_lap, Database, LapDetailed,
    ReauthPolicy, RemoteStore, Store, SyncFailure, SyncState, TxnMode,
};

type AppendHook = Box<dyn Fn(&LapDetailed) + Send + Sync>;

/// Records delivered lap ids in order; failures are injected per lap id and
/// fire once.
struct FakeRemote {
    rows: Mutex<Vec<String>>,
    fail_once: Mutex<HashMap<String, DeliveryError>>,
    token_valid: AtomicBool,
    /// No spreadsheet until the next successful reauthorization.
    sheet_missing: AtomicBool,
    /// Runs at the start of every delivery.
    on_append: Option<AppendHook>,
    reauth_succeeds: bool,
    reauth_fixes_token: bool,
    invalidations: AtomicU32,
    reauths: AtomicU32,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            fail_once: Mutex::new(HashMap::new()),
            token_valid: AtomicBool::new(true),
            sheet_missing: AtomicBool::new(false),
            on_append: None,
            reauth_succeeds: true,
            reauth_fixes_token: true,
            invalidations: AtomicU32::new(0),
            reauths: AtomicU32::new(0),
        }
    }

    fn logged_out() -> Self {
        let remote = Self::new();
        remote.token_valid.store(false, Ordering::SeqCst);
        remote
    }

    fn without_sheet() -> Self {
        let remote = Self::new();
        remote.sheet_missing.store(true, Ordering::SeqCst);
        remote
    }

    fn fail(&self, lap_id: &str, error: DeliveryError) {
        self.fail_once
            .lock()
            .unwrap()
            .insert(lap_id.to_string(), error);
    }

    fn rows(&self) -> Vec<String> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    type Handle = ();

    async fn ensure_authorized(&self) -> Result<(), AuthError> {
        if self.sheet_missing.load(Ordering::SeqCst) {
            return Err(AuthError::SpreadsheetMissing);
        }
        if self.token_valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    async fn append_lap(&self, _: &(), lap: &LapDetailed) -> Result<(), DeliveryError> {
        if let Some(hook) = &self.on_append {
            hook(lap);
        }
        if let Some(error) = self.fail_once.lock().unwrap().remove(&lap.lap.id) {
            return Err(error);
        }
        self.rows.lock().unwrap().push(lap.lap.id.clone());
        Ok(())
    }

    fn invalidate_token(&self) -> Result<(), AuthError> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.token_valid.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn reauthorize(&self) -> Result<(), AuthError> {
        self.reauths.fetch_add(1, Ordering::SeqCst);
        if !self.reauth_succeeds {
            return Err(OAuthError::AuthorizationFailed("access_denied".into()).into());
        }
        if self.reauth_fixes_token {
            self.token_valid.store(true, Ordering::SeqCst);
            self.sheet_missing.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn session_with_laps(db: &mut Database, n: u32) -> (String, Vec<String>) {
    let mut txn = db.txn(&[], TxnMode::ReadWrite).unwrap();
    let (session, settings) = txn.create_session_from_active_settings().unwrap();
    let lap_ids = add_laps(&mut txn, &session.id, &settings, n);
    txn.commit().unwrap();
    (session.id, lap_ids)
}

fn add_laps(
    txn: &mut vlaps_core::Txn<'_>,
    session_id: &str,
    settings: &vlaps_core::Settings,
    n: u32,
) -> Vec<String> {
    let t0 = Utc::now();
    (0..n)
        .map(|i| {
            let begin = t0 + Duration::seconds(46 * i64::from(i));
            record_lap(txn, session_id, settings, begin, begin + Duration::seconds(46))
                .unwrap()
                .unwrap()
                .id
        })
        .collect()
}

fn flags(db: &mut Database, session_id: &str) -> Vec<bool> {
    let txn = db.txn(&[Store::Session, Store::Lap], TxnMode::ReadOnly).unwrap();
    let detailed = txn.get_session_detailed(session_id).unwrap();
    detailed.laps.iter().map(|l| l.lap.synced).collect()
}

/// Flags as seen through a second connection to the same file.
fn flags_at(path: &Path, session_id: &str) -> Vec<bool> {
    let mut reader = Database::open_at(path).unwrap();
    flags(&mut reader, session_id)
}

fn file_db() -> (tempfile::TempDir, PathBuf, Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vlaps.db");
    let db = Database::open_at(&path).unwrap();
    (dir, path, db)
}

#[derive(Clone)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

struct LogBufferGuard(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferGuard(self.0.clone())
    }
}

impl Write for LogBufferGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn state(db: &mut Database, session_id: &str) -> SyncState {
    let txn = db.txn(&[Store::Session, Store::Lap], TxnMode::ReadOnly).unwrap();
    let detailed = txn.get_session_detailed(session_id).unwrap();
    SyncState::of(&detailed)
}

#[tokio::test]
async fn delivers_every_pending_lap_in_idx_order() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, laps) = session_with_laps(&mut db, 3);
    let remote = FakeRemote::new();
    assert_eq!(state(&mut db, &session_id), SyncState::HasPending);

    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();

    assert!(report.is_synced());
    assert_eq!(report.pending, laps);
    assert_eq!(report.delivered, laps);
    assert_eq!(remote.rows(), laps);
    assert_eq!(flags(&mut db, &session_id), vec![true, true, true]);
    assert_eq!(state(&mut db, &session_id), SyncState::AllSynced);
}

#[tokio::test]
async fn partial_failure_keeps_delivered_prefix() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, laps) = session_with_laps(&mut db, 3);
    let remote = FakeRemote::new();
    remote.fail(&laps[1], DeliveryError::Transient("quota".into()));

    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();

    assert!(!report.is_synced());
    assert_eq!(report.delivered, vec![laps[0].clone()]);
    assert_eq!(report.remaining(), 2);
    assert!(matches!(
        &report.failure,
        Some(SyncFailure::Delivery { lap_id, .. }) if lap_id == &laps[1]
    ));
    assert_eq!(flags(&mut db, &session_id), vec![true, false, false]);
    assert_eq!(state(&mut db, &session_id), SyncState::HasPending);

    // Retrying resends only what is still unsynced.
    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();
    assert!(report.is_synced());
    assert_eq!(report.pending, laps[1..].to_vec());
    assert_eq!(remote.rows(), laps);
    assert_eq!(flags(&mut db, &session_id), vec![true, true, true]);
}

#[tokio::test]
async fn second_pass_delivers_nothing() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, _) = session_with_laps(&mut db, 2);
    let remote = FakeRemote::new();

    reconcile(&mut db, &remote, &session_id).await.unwrap();
    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();

    assert!(report.is_synced());
    assert!(report.pending.is_empty());
    assert!(report.delivered.is_empty());
    assert_eq!(remote.rows().len(), 2);
}

#[tokio::test]
async fn authorization_failure_reverts_every_pending_lap() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, _) = session_with_laps(&mut db, 3);
    let remote = FakeRemote::logged_out();

    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();

    assert!(matches!(
        report.failure,
        Some(SyncFailure::Auth(AuthError::Unauthorized))
    ));
    assert!(report.delivered.is_empty());
    assert!(remote.rows().is_empty());
    assert_eq!(flags(&mut db, &session_id), vec![false, false, false]);
}

#[tokio::test]
async fn only_new_laps_are_pending_after_a_sync() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, laps) = session_with_laps(&mut db, 2);
    let remote = FakeRemote::new();
    reconcile(&mut db, &remote, &session_id).await.unwrap();

    let mut txn = db.txn(&[], TxnMode::ReadWrite).unwrap();
    let settings = txn.get_active_settings().unwrap();
    let last = txn.get_laps_for_session(&session_id).unwrap();
    let begin = last[last.len() - 1].begin + Duration::seconds(46);
    let lap = record_lap(&mut txn, &session_id, &settings, begin, begin + Duration::seconds(46))
        .unwrap()
        .unwrap();
    txn.commit().unwrap();
    assert_eq!(lap.idx, 3);

    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();
    assert_eq!(report.pending, vec![lap.id.clone()]);
    assert_eq!(remote.rows(), vec![laps[0].clone(), laps[1].clone(), lap.id]);
}

#[tokio::test]
async fn unauthorized_mid_stream_is_retried_after_reauthorization() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, laps) = session_with_laps(&mut db, 3);
    let remote = FakeRemote::new();
    remote.fail(&laps[1], DeliveryError::Unauthorized);

    let report = reconcile_with_reauth(&mut db, &remote, &session_id, ReauthPolicy::default())
        .await
        .unwrap();

    assert!(report.is_synced());
    assert_eq!(report.reauth_attempts, 1);
    assert_eq!(report.delivered, laps);
    assert_eq!(remote.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(remote.reauths.load(Ordering::SeqCst), 1);
    assert_eq!(remote.rows(), laps);
    assert_eq!(flags(&mut db, &session_id), vec![true, true, true]);
}

#[tokio::test]
async fn reauthorization_is_bounded() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, _) = session_with_laps(&mut db, 1);
    let remote = FakeRemote {
        reauth_fixes_token: false,
        ..FakeRemote::logged_out()
    };
    let policy = ReauthPolicy {
        max_attempts: 2,
        interactive: true,
    };

    let report = reconcile_with_reauth(&mut db, &remote, &session_id, policy)
        .await
        .unwrap();

    assert!(!report.is_synced());
    assert_eq!(report.reauth_attempts, 2);
    assert_eq!(remote.reauths.load(Ordering::SeqCst), 2);
    assert_eq!(remote.invalidations.load(Ordering::SeqCst), 3);
    assert_eq!(flags(&mut db, &session_id), vec![false]);
}

#[tokio::test]
async fn non_interactive_policy_only_invalidates() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, _) = session_with_laps(&mut db, 1);
    let remote = FakeRemote::logged_out();

    let report = reconcile_with_reauth(&mut db, &remote, &session_id, ReauthPolicy::never())
        .await
        .unwrap();

    assert!(report.failure.as_ref().is_some_and(SyncFailure::is_unauthorized));
    assert_eq!(remote.reauths.load(Ordering::SeqCst), 0);
    assert_eq!(remote.invalidations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_reauthorization_is_reported() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, _) = session_with_laps(&mut db, 2);
    let remote = FakeRemote {
        reauth_succeeds: false,
        ..FakeRemote::logged_out()
    };

    let report = reconcile_with_reauth(&mut db, &remote, &session_id, ReauthPolicy::default())
        .await
        .unwrap();

    assert!(matches!(
        report.failure,
        Some(SyncFailure::Auth(AuthError::OAuth(_)))
    ));
    assert_eq!(remote.reauths.load(Ordering::SeqCst), 1);
    assert_eq!(flags(&mut db, &session_id), vec![false, false]);
}

#[tokio::test]
async fn reconcile_all_syncs_every_pending_session() {
    let mut db = Database::open_in_memory().unwrap();
    let (first, _) = session_with_laps(&mut db, 2);
    let (second, _) = session_with_laps(&mut db, 1);
    let (_empty, _) = session_with_laps(&mut db, 0);
    let remote = FakeRemote::new();

    let reports = reconcile_all(&mut db, &remote, ReauthPolicy::never())
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_synced()));
    assert_eq!(remote.rows().len(), 3);
    assert_eq!(state(&mut db, &first), SyncState::AllSynced);
    assert_eq!(state(&mut db, &second), SyncState::AllSynced);

    let reports = reconcile_all(&mut db, &remote, ReauthPolicy::never())
        .await
        .unwrap();
    assert!(reports.is_empty());
}

#[tokio::test]
async fn reconcile_all_stops_after_authorization_failure() {
    let mut db = Database::open_in_memory().unwrap();
    session_with_laps(&mut db, 1);
    session_with_laps(&mut db, 1);
    let remote = FakeRemote::logged_out();

    let reports = reconcile_all(&mut db, &remote, ReauthPolicy::never())
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert!(!reports[0].is_synced());
}

#[tokio::test]
async fn unknown_session_is_a_storage_error() {
    let mut db = Database::open_in_memory().unwrap();
    let remote = FakeRemote::new();

    let err = reconcile(&mut db, &remote, "missing").await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound { store: Store::Session, .. }));
}

#[tokio::test]
async fn missing_spreadsheet_is_provisioned_by_reauthorization() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, laps) = session_with_laps(&mut db, 2);
    let remote = FakeRemote::without_sheet();

    let report = reconcile_with_reauth(&mut db, &remote, &session_id, ReauthPolicy::default())
        .await
        .unwrap();

    assert!(report.is_synced());
    assert_eq!(report.reauth_attempts, 1);
    assert_eq!(remote.reauths.load(Ordering::SeqCst), 1);
    // The token was fine; only the sheet was missing.
    assert_eq!(remote.invalidations.load(Ordering::SeqCst), 0);
    assert_eq!(remote.rows(), laps);
    assert_eq!(flags(&mut db, &session_id), vec![true, true]);
}

#[tokio::test]
async fn missing_spreadsheet_without_interactive_login_stays_pending() {
    let mut db = Database::open_in_memory().unwrap();
    let (session_id, _) = session_with_laps(&mut db, 1);
    let remote = FakeRemote::without_sheet();

    let report = reconcile_with_reauth(&mut db, &remote, &session_id, ReauthPolicy::never())
        .await
        .unwrap();

    assert!(matches!(
        report.failure,
        Some(SyncFailure::Auth(AuthError::SpreadsheetMissing))
    ));
    assert_eq!(remote.reauths.load(Ordering::SeqCst), 0);
    assert_eq!(remote.invalidations.load(Ordering::SeqCst), 0);
    assert_eq!(flags(&mut db, &session_id), vec![false]);
}

#[tokio::test]
async fn pending_laps_read_as_synced_while_delivery_runs() {
    let (_dir, path, mut db) = file_db();
    let (session_id, laps) = session_with_laps(&mut db, 3);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let remote = {
        let path = path.clone();
        let session_id = session_id.clone();
        let seen = seen.clone();
        let remote = FakeRemote {
            on_append: Some(Box::new(move |_: &LapDetailed| {
                seen.lock().unwrap().push(flags_at(&path, &session_id));
            })),
            ..FakeRemote::new()
        };
        remote.fail(&laps[2], DeliveryError::Transient("quota".into()));
        remote
    };

    let report = reconcile(&mut db, &remote, &session_id).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![true, true, true]; 3],
        "other readers must see the flip before any lap goes out"
    );
    assert_eq!(report.delivered, laps[..2].to_vec());
    assert_eq!(flags_at(&path, &session_id), vec![true, true, false]);
}

#[tokio::test]
async fn failed_revert_logs_the_stranded_laps() {
    let (_dir, path, mut db) = file_db();
    let (session_id, laps) = session_with_laps(&mut db, 3);

    // Losing the failed lap's row makes the revert insert it behind lap 3,
    // which the store refuses.
    let remote = {
        let path = path.clone();
        let failing = laps[1].clone();
        let remote = FakeRemote {
            on_append: Some(Box::new(move |lap: &LapDetailed| {
                if lap.lap.id == failing {
                    let conn = rusqlite::Connection::open(&path).unwrap();
                    conn.execute("DELETE FROM lap WHERE id = ?1", [&failing])
                        .unwrap();
                }
            })),
            ..FakeRemote::new()
        };
        remote.fail(&laps[1], DeliveryError::Transient("quota".into()));
        remote
    };

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(LogBuffer(buffer.clone()))
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    let guard = tracing::dispatcher::set_default(&dispatch);

    let err = reconcile(&mut db, &remote, &session_id).await.unwrap_err();
    drop(guard);

    assert!(matches!(err, DatabaseError::OutOfOrderLap { idx: 2, last_idx: 3, .. }));
    // Lap 3 was never delivered yet still reads as synced.
    assert_eq!(flags(&mut db, &session_id), vec![true, true]);
    assert_eq!(remote.rows(), vec![laps[0].clone()]);

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("undelivered laps left marked synced"));
    assert!(logs.contains(&laps[1]));
    assert!(logs.contains(&laps[2]));
}
