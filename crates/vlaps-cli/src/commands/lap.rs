use chrono::{Duration, Utc};
use clap::Subcommand;
use vlaps_core::{record_lap, LapClock, TxnMode};

use super::{open, CmdResult};

#[derive(Subcommand)]
pub enum LapAction {
    /// Record the lap that just ended
    Record {
        session_id: String,
        /// Seconds since the lap began
        #[arg(long)]
        seconds: f64,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: LapAction) -> CmdResult {
    let (_, mut db) = open()?;
    match action {
        LapAction::Record {
            session_id,
            seconds,
            json,
        } => {
            if !(seconds > 0.0) {
                return Err("--seconds must be positive".into());
            }
            let now = Utc::now();
            let begin = Duration::try_milliseconds((seconds * 1000.0).round() as i64)
                .and_then(|elapsed| now.checked_sub_signed(elapsed))
                .ok_or("--seconds is out of range")?;

            let mut txn = db.txn(&[], TxnMode::ReadWrite)?;
            let settings = txn.get_active_settings()?;
            let recorded = record_lap(&mut txn, &session_id, &settings, begin, now)?;
            txn.commit()?;

            match recorded {
                Some(lap) if json => println!("{}", serde_json::to_string_pretty(&lap)?),
                Some(lap) => {
                    println!("lap {} recorded ({:+.1} s)", lap.idx, lap.delay_seconds());
                    if settings.is_session_complete(lap.idx) {
                        println!("session complete");
                    }
                }
                None => {
                    let clock = LapClock::new(&settings);
                    println!(
                        "tap ignored: {seconds} s is too early for a {} s lap",
                        clock.seconds_lap()
                    );
                }
            }
        }
    }
    Ok(())
}
