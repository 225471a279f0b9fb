use clap::Subcommand;
use vlaps_core::{SessionDetailed, Store, TxnMode};

use super::{open, CmdResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a session from the active profile; prints its id
    New {
        #[arg(long)]
        json: bool,
    },
    /// List sessions, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show a session with its laps and running totals
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: SessionAction) -> CmdResult {
    let (_, mut db) = open()?;
    match action {
        SessionAction::New { json } => {
            let mut txn = db.txn(&[], TxnMode::ReadWrite)?;
            let (session, _) = txn.create_session_from_active_settings()?;
            txn.commit()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                println!("{}", session.id);
            }
        }
        SessionAction::List { json } => {
            let txn = db.txn(&[Store::Session, Store::Lap], TxnMode::ReadOnly)?;
            let sessions = txn.get_sessions_detailed()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions.");
            } else {
                for s in &sessions {
                    println!(
                        "{}  {}  {:>3} laps  {:>6} m  {}",
                        s.id(),
                        s.session.date.format("%Y-%m-%d %H:%M"),
                        s.laps.len(),
                        s.distance(),
                        sync_label(s),
                    );
                }
            }
        }
        SessionAction::Show { id, json } => {
            let txn = db.txn(&[Store::Session, Store::Lap], TxnMode::ReadOnly)?;
            let session = txn.get_session_detailed(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print_session(&session);
            }
        }
    }
    Ok(())
}

fn sync_label(s: &SessionDetailed) -> &'static str {
    if s.synced() {
        "synced"
    } else {
        "pending"
    }
}

fn print_session(s: &SessionDetailed) {
    println!("Session {}", s.id());
    println!("Date:     {}", s.session.date.format("%Y-%m-%d %H:%M:%S"));
    println!("Pool:     {} m", s.session.pool_meters);
    println!("Distance: {} m in {:.1} s", s.distance(), s.seconds());
    println!("Delay:    {:+.1} s total", s.acc_delay_seconds());
    println!("Status:   {}", sync_label(s));
    for l in &s.laps {
        println!(
            "  #{:<3} {:>6.1} s  {:+6.1} s  {:>6} m  {}",
            l.lap.idx,
            l.lap.seconds,
            l.totals.delay_seconds,
            l.totals.acc_meters,
            if l.lap.synced { "synced" } else { "pending" },
        );
    }
}
