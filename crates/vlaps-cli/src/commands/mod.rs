pub mod auth;
pub mod completions;
pub mod config;
pub mod lap;
pub mod session;
pub mod settings;
pub mod sync;

use std::sync::Arc;

use vlaps_core::{Config, Database, GoogleSheetsStore, KeyringCredentials};

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Load the config and open the database it names.
pub fn open() -> Result<(Config, Database), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open(&config)?;
    Ok((config, db))
}

/// The spreadsheet adapter backed by the OS keyring.
pub fn sheets(config: &Config) -> Result<GoogleSheetsStore, Box<dyn std::error::Error>> {
    Ok(GoogleSheetsStore::new(
        &config.google,
        Arc::new(KeyringCredentials),
    )?)
}

pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// `(1, 30)` -> `"1:30"`.
pub fn mm_ss((minutes, seconds): (u32, u32)) -> String {
    format!("{minutes}:{seconds:02}")
}
