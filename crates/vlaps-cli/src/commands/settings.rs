use clap::Subcommand;
use vlaps_core::{Settings, Store, TxnMode};

use super::{mm_ss, open, CmdResult};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show the active profile and its derived values
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Change fields of the active profile
    Set {
        /// Laps per session
        #[arg(long)]
        laps: Option<u32>,
        /// Pool length in meters
        #[arg(long)]
        pool: Option<f64>,
        /// Target pace, seconds per 100 m
        #[arg(long)]
        pace: Option<f64>,
        /// Countdown before the first lap, in seconds
        #[arg(long)]
        delay: Option<f64>,
    },
}

pub fn run(action: SettingsAction) -> CmdResult {
    let (_, mut db) = open()?;
    match action {
        SettingsAction::Show { json } => {
            let txn = db.txn(&[Store::Setting, Store::ActiveSetting], TxnMode::ReadOnly)?;
            let settings = txn.get_active_settings()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                print_settings(&settings);
            }
        }
        SettingsAction::Set {
            laps,
            pool,
            pace,
            delay,
        } => {
            let _subscription = db.subscribe_active_settings(|s| {
                println!("active settings updated");
                print_settings(s);
            });
            let mut txn = db.txn(&[Store::Setting, Store::ActiveSetting], TxnMode::ReadWrite)?;
            let current = txn.get_active_settings()?;
            let updated = Settings {
                number_of_laps: laps.unwrap_or(current.number_of_laps),
                pool_meters: pool.unwrap_or(current.pool_meters),
                seconds_100m: pace.unwrap_or(current.seconds_100m),
                start_delay_seconds: delay.unwrap_or(current.start_delay_seconds),
                ..current
            };
            txn.put_settings(&updated)?;
            txn.commit()?;
        }
    }
    Ok(())
}

fn print_settings(s: &Settings) {
    println!("Laps:       {}", s.number_of_laps);
    println!("Pool:       {} m", s.pool_meters);
    println!("Pace:       {} /100 m", mm_ss(s.minutes_seconds_100m()));
    println!("Lap time:   {}", mm_ss(s.minutes_seconds_lap()));
    println!("Start in:   {} s", s.start_delay_seconds);
    println!("Distance:   {} m", s.total_distance());
    println!("Total time: {} s", s.total_time_seconds());
}
