mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, DatabaseConfig, GoogleConfig, SyncConfig};
pub use database::{Database, Txn};

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Record collections of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Store {
    Setting,
    ActiveSetting,
    Session,
    Lap,
}

impl Store {
    pub const ALL: [Store; 4] = [Store::Setting, Store::ActiveSetting, Store::Session, Store::Lap];

    pub fn table(&self) -> &'static str {
        match self {
            Store::Setting => "setting",
            Store::ActiveSetting => "active_setting",
            Store::Session => "session",
            Store::Lap => "lap",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

/// Returns `~/.config/vlaps[-dev]/` based on VLAPS_ENV.
///
/// Set VLAPS_ENV=dev to use development data directory. VLAPS_DATA_DIR
/// overrides the location entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("VLAPS_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("VLAPS_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("vlaps-dev")
            } else {
                base_dir.join("vlaps")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}
