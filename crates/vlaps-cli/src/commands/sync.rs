//! Push unsynced laps to the Google Sheets spreadsheet.

use clap::Subcommand;
use vlaps_core::{reconcile_all, reconcile_with_reauth, ReauthPolicy, Store, SyncReport, TxnMode};

use super::{open, runtime, sheets, CmdResult};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Sync one session
    Session { id: String },
    /// Sync every session with pending laps
    All,
    /// Show sessions with laps waiting for delivery
    Status,
}

pub fn run(action: SyncAction) -> CmdResult {
    let (config, mut db) = open()?;
    let policy = ReauthPolicy::from(&config.sync);
    tracing::debug!(?policy, "sync policy");

    let reports = match action {
        SyncAction::Status => {
            let txn = db.txn(&[Store::Session, Store::Lap], TxnMode::ReadOnly)?;
            let ids = txn.sessions_with_pending_laps()?;
            if ids.is_empty() {
                println!("All sessions synced.");
            }
            for id in ids {
                let session = txn.get_session_detailed(&id)?;
                println!("{id}  {} pending", session.unsynced_laps().count());
            }
            return Ok(());
        }
        SyncAction::Session { id } => {
            let remote = sheets(&config)?;
            let report = runtime()?.block_on(reconcile_with_reauth(&mut db, &remote, &id, policy))?;
            vec![report]
        }
        SyncAction::All => {
            let remote = sheets(&config)?;
            runtime()?.block_on(reconcile_all(&mut db, &remote, policy))?
        }
    };

    if reports.is_empty() {
        println!("Nothing to sync.");
    }
    for report in &reports {
        print_report(report);
    }
    if reports.iter().all(SyncReport::is_synced) {
        Ok(())
    } else {
        Err("some laps were not synced; they will be retried next time".into())
    }
}

fn print_report(report: &SyncReport) {
    match &report.failure {
        None => println!(
            "{}: {} laps synced",
            report.session_id,
            report.delivered.len()
        ),
        Some(failure) => println!(
            "{}: {} of {} laps synced, {} pending ({failure})",
            report.session_id,
            report.delivered.len(),
            report.pending.len(),
            report.remaining(),
        ),
    }
}
