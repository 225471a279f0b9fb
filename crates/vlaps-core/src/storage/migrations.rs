//! Database schema migrations for vlaps.
//!
//! Migrations are an ordered list of steps applied automatically when the
//! database is opened. The `schema_version` table tracks how many steps have
//! run; unseen steps are applied in sequence inside one upgrade transaction.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::models::Settings;

/// Key of the single row in `active_setting`.
pub const ACTIVE_SETTING_KEY: i64 = 1;

/// One upgrade step: creates a collection/index or backfills data.
pub struct Migration {
    pub description: &'static str,
    pub apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        description: "create setting, active_setting, session and lap stores",
        apply: migrate_v1,
    },
    Migration {
        description: "index sessions by date",
        apply: migrate_v2,
    },
];

/// Current schema version: the number of defined steps.
pub const CURRENT_VERSION: usize = MIGRATIONS.len();

/// Apply all pending migrations to bring the database to [`CURRENT_VERSION`].
///
/// Returns the number of steps applied.
///
/// # Errors
/// Returns an error if a step fails; nothing from the failed upgrade is kept.
pub fn migrate(conn: &Connection) -> Result<usize, DatabaseError> {
    migrate_with(conn, MIGRATIONS)
}

/// Apply `steps[version..]` where `version` is the stored schema version.
pub fn migrate_with(conn: &Connection, steps: &[Migration]) -> Result<usize, DatabaseError> {
    create_schema_version_table(conn)?;
    let current = schema_version(conn)?;

    if current > steps.len() {
        return Err(DatabaseError::MigrationFailed(format!(
            "database is at version {current} but only {} steps are known",
            steps.len()
        )));
    }
    if current == steps.len() {
        debug!(version = current, "schema up to date");
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    for (offset, step) in steps[current..].iter().enumerate() {
        let version = current + offset + 1;
        info!(version, description = step.description, "applying migration");
        (step.apply)(&tx).map_err(|e| {
            DatabaseError::MigrationFailed(format!("v{version} ({}): {e}", step.description))
        })?;
    }
    set_schema_version(&tx, steps.len())?;
    tx.commit()?;

    Ok(steps.len() - current)
}

/// Create the schema_version table if it doesn't exist.
fn create_schema_version_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<usize, DatabaseError> {
    let version = conn
        .query_row("SELECT version FROM schema_version", [], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0).max(0) as usize)
}

fn set_schema_version(tx: &Transaction<'_>, version: usize) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version as i64],
    )?;
    Ok(())
}

/// Migration v1: the four stores, the lap session index, and the first-run
/// settings profile pointed to by `active_setting`.
fn migrate_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE setting (
            id                  TEXT PRIMARY KEY,
            number_of_laps      INTEGER NOT NULL,
            pool_meters         REAL NOT NULL,
            seconds_100m        REAL NOT NULL,
            start_delay_seconds REAL NOT NULL
        );

        CREATE TABLE active_setting (
            id         INTEGER PRIMARY KEY,
            setting_id TEXT NOT NULL
        );

        CREATE TABLE session (
            id          TEXT PRIMARY KEY,
            date        TEXT NOT NULL,
            pool_meters REAL NOT NULL
        );

        CREATE TABLE lap (
            id               TEXT PRIMARY KEY,
            session_id       TEXT NOT NULL,
            idx              INTEGER NOT NULL,
            pool_meters      REAL NOT NULL,
            begin            TEXT NOT NULL,
            seconds          REAL NOT NULL,
            expected_seconds REAL NOT NULL,
            synced           INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_lap_session_id ON lap(session_id);",
    )?;

    let defaults = Settings::default();
    tx.execute(
        "INSERT INTO setting (id, number_of_laps, pool_meters, seconds_100m, start_delay_seconds)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            defaults.id,
            defaults.number_of_laps,
            defaults.pool_meters,
            defaults.seconds_100m,
            defaults.start_delay_seconds,
        ],
    )?;
    tx.execute(
        "INSERT INTO active_setting (id, setting_id) VALUES (?1, ?2)",
        params![ACTIVE_SETTING_KEY, defaults.id],
    )?;
    Ok(())
}

/// Migration v2: secondary index for listing sessions by date.
fn migrate_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch("CREATE INDEX idx_session_date ON session(date);")
}
