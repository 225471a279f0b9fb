//! SQLite-backed record store for settings, sessions and laps.
//!
//! All access goes through a [`Txn`] opened with [`Database::txn`]: it names
//! the stores it touches and whether it writes. Writes become visible together
//! on [`Txn::commit`]; dropping a transaction rolls it back.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::migrations::{self, ACTIVE_SETTING_KEY};
use super::{data_dir, Config, Store, TxnMode};
use crate::aggregate::detail;
use crate::error::{CoreError, DatabaseError};
use crate::events::{SettingsObservers, SettingsSubscription};
use crate::models::{Lap, Session, SessionDetailed, Settings};

/// SQLite database holding the vlaps record stores.
pub struct Database {
    conn: Connection,
    observers: SettingsObservers,
}

impl Database {
    /// Open the database named in `config` inside the data directory.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the database
    /// cannot be opened or migrated.
    pub fn open(config: &Config) -> Result<Self, CoreError> {
        let path = data_dir()?.join(&config.database.file_name);
        Ok(Self::open_at(path)?)
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn)?;
        Ok(Self {
            conn,
            observers: SettingsObservers::new(),
        })
    }

    /// Register a listener for changes to the active settings.
    pub fn subscribe_active_settings<F>(&self, listener: F) -> SettingsSubscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    /// Open a transaction over `stores` (all stores when empty).
    pub fn txn(&mut self, stores: &[Store], mode: TxnMode) -> Result<Txn<'_>, DatabaseError> {
        let behavior = match mode {
            TxnMode::ReadOnly => TransactionBehavior::Deferred,
            TxnMode::ReadWrite => TransactionBehavior::Immediate,
        };
        let Database { conn, observers } = self;
        let tx = conn.transaction_with_behavior(behavior)?;
        let stores = if stores.is_empty() {
            Store::ALL.to_vec()
        } else {
            stores.to_vec()
        };
        Ok(Txn {
            tx,
            stores,
            mode,
            observers,
            changed_settings: None,
        })
    }
}

/// A scoped unit of work over a set of stores.
pub struct Txn<'db> {
    tx: rusqlite::Transaction<'db>,
    stores: Vec<Store>,
    mode: TxnMode,
    observers: &'db SettingsObservers,
    /// Latest active settings written here; published on commit.
    changed_settings: Option<Settings>,
}

impl<'db> Txn<'db> {
    /// Commit every write. Active-settings listeners are called after the
    /// commit succeeds and before this returns.
    pub fn commit(self) -> Result<(), DatabaseError> {
        let Txn {
            tx,
            observers,
            changed_settings,
            ..
        } = self;
        tx.commit()?;
        if let Some(settings) = changed_settings {
            observers.notify(&settings);
        }
        Ok(())
    }

    fn read(&self, store: Store) -> Result<(), DatabaseError> {
        if self.stores.contains(&store) {
            Ok(())
        } else {
            Err(DatabaseError::StoreNotInScope { store })
        }
    }

    fn write(&self, store: Store) -> Result<(), DatabaseError> {
        self.read(store)?;
        match self.mode {
            TxnMode::ReadWrite => Ok(()),
            TxnMode::ReadOnly => Err(DatabaseError::ReadOnly { store }),
        }
    }

    // ── Settings ────────────────────────────────────────────────────────

    fn active_setting_id(&self) -> Result<String, DatabaseError> {
        self.read(Store::ActiveSetting)?;
        self.tx
            .query_row(
                "SELECT setting_id FROM active_setting WHERE id = ?1",
                [ACTIVE_SETTING_KEY],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound {
                store: Store::ActiveSetting,
                key: ACTIVE_SETTING_KEY.to_string(),
            })
    }

    pub fn get_settings(&self, id: &str) -> Result<Settings, DatabaseError> {
        self.read(Store::Setting)?;
        self.tx
            .query_row(
                "SELECT id, number_of_laps, pool_meters, seconds_100m, start_delay_seconds
                 FROM setting WHERE id = ?1",
                [id],
                settings_from_row,
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound {
                store: Store::Setting,
                key: id.to_string(),
            })
    }

    pub fn get_active_settings(&self) -> Result<Settings, DatabaseError> {
        let id = self.active_setting_id()?;
        self.get_settings(&id)
    }

    /// Insert or replace a settings profile. Writing the active profile
    /// notifies listeners on commit.
    pub fn put_settings(&mut self, settings: &Settings) -> Result<(), DatabaseError> {
        settings.validate()?;
        self.write(Store::Setting)?;
        self.tx.execute(
            "INSERT OR REPLACE INTO setting
                (id, number_of_laps, pool_meters, seconds_100m, start_delay_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                settings.id,
                settings.number_of_laps,
                settings.pool_meters,
                settings.seconds_100m,
                settings.start_delay_seconds,
            ],
        )?;
        if self.active_setting_id()? == settings.id {
            self.changed_settings = Some(settings.clone());
        }
        Ok(())
    }

    /// Point the active-settings record at another stored profile.
    pub fn set_active_settings(&mut self, id: &str) -> Result<Settings, DatabaseError> {
        self.write(Store::ActiveSetting)?;
        let settings = self.get_settings(id)?;
        self.tx.execute(
            "INSERT OR REPLACE INTO active_setting (id, setting_id) VALUES (?1, ?2)",
            params![ACTIVE_SETTING_KEY, id],
        )?;
        self.changed_settings = Some(settings.clone());
        Ok(settings)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    pub fn get_session(&self, id: &str) -> Result<Session, DatabaseError> {
        self.read(Store::Session)?;
        self.tx
            .query_row(
                "SELECT id, date, pool_meters FROM session WHERE id = ?1",
                [id],
                session_from_row,
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound {
                store: Store::Session,
                key: id.to_string(),
            })
    }

    pub fn put_session(&mut self, session: &Session) -> Result<(), DatabaseError> {
        self.write(Store::Session)?;
        self.tx.execute(
            "INSERT OR REPLACE INTO session (id, date, pool_meters) VALUES (?1, ?2, ?3)",
            params![session.id, session.date, session.pool_meters],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn get_sessions_sorted_by_date(&self) -> Result<Vec<Session>, DatabaseError> {
        self.read(Store::Session)?;
        let mut stmt = self
            .tx
            .prepare("SELECT id, date, pool_meters FROM session ORDER BY date DESC, id DESC")?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Insert a new session copying the active profile's pool length.
    pub fn create_session_from_active_settings(
        &mut self,
    ) -> Result<(Session, Settings), DatabaseError> {
        let settings = self.get_active_settings()?;
        let session = Session::new(settings.pool_meters);
        self.put_session(&session)?;
        debug!(session_id = %session.id, pool_meters = session.pool_meters, "session created");
        Ok((session, settings))
    }

    // ── Laps ────────────────────────────────────────────────────────────

    /// Laps of a session ordered by idx. Unknown sessions have no laps.
    pub fn get_laps_for_session(&self, session_id: &str) -> Result<Vec<Lap>, DatabaseError> {
        self.read(Store::Lap)?;
        let mut stmt = self.tx.prepare(
            "SELECT id, session_id, idx, pool_meters, begin, seconds, expected_seconds, synced
             FROM lap WHERE session_id = ?1 ORDER BY idx",
        )?;
        let laps = stmt
            .query_map([session_id], lap_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(laps)
    }

    /// Highest recorded idx of a session, 0 before the first lap.
    pub fn last_lap_idx(&self, session_id: &str) -> Result<u32, DatabaseError> {
        self.read(Store::Lap)?;
        let idx: Option<u32> = self.tx.query_row(
            "SELECT MAX(idx) FROM lap WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(idx.unwrap_or(0))
    }

    /// Insert a new lap or update an existing one.
    ///
    /// A new lap needs [`Store::Session`] in scope: its session must exist and
    /// its idx must exceed every idx already recorded for that session. An
    /// existing lap keeps its idx; in practice only `synced` changes.
    pub fn put_lap(&mut self, lap: &Lap) -> Result<(), DatabaseError> {
        self.write(Store::Lap)?;
        let existing: Option<u32> = self
            .tx
            .query_row("SELECT idx FROM lap WHERE id = ?1", [&lap.id], |row| {
                row.get(0)
            })
            .optional()?;

        match existing {
            Some(idx) if idx != lap.idx => {
                return Err(DatabaseError::LapIdxChanged {
                    lap_id: lap.id.clone(),
                })
            }
            Some(_) => {
                self.tx.execute(
                    "UPDATE lap SET session_id = ?2, pool_meters = ?3, begin = ?4, seconds = ?5,
                        expected_seconds = ?6, synced = ?7
                     WHERE id = ?1",
                    params![
                        lap.id,
                        lap.session_id,
                        lap.pool_meters,
                        lap.begin,
                        lap.seconds,
                        lap.expected_seconds,
                        lap.synced,
                    ],
                )?;
            }
            None => {
                self.get_session(&lap.session_id)?;
                let last_idx = self.last_lap_idx(&lap.session_id)?;
                if lap.idx <= last_idx {
                    return Err(DatabaseError::OutOfOrderLap {
                        session_id: lap.session_id.clone(),
                        idx: lap.idx,
                        last_idx,
                    });
                }
                self.tx.execute(
                    "INSERT INTO lap
                        (id, session_id, idx, pool_meters, begin, seconds, expected_seconds, synced)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        lap.id,
                        lap.session_id,
                        lap.idx,
                        lap.pool_meters,
                        lap.begin,
                        lap.seconds,
                        lap.expected_seconds,
                        lap.synced,
                    ],
                )?;
            }
        }
        Ok(())
    }

    // ── Derived views ───────────────────────────────────────────────────

    pub fn get_session_detailed(&self, session_id: &str) -> Result<SessionDetailed, DatabaseError> {
        let session = self.get_session(session_id)?;
        let laps = self.get_laps_for_session(session_id)?;
        Ok(detail(&session, &laps))
    }

    /// Every session with its laps, newest first.
    pub fn get_sessions_detailed(&self) -> Result<Vec<SessionDetailed>, DatabaseError> {
        self.get_sessions_sorted_by_date()?
            .into_iter()
            .map(|session| {
                let laps = self.get_laps_for_session(&session.id)?;
                Ok(detail(&session, &laps))
            })
            .collect()
    }

    /// Mark every lap of a session as synced and return the session as it
    /// stood before.
    pub fn set_session_synced(&mut self, session_id: &str) -> Result<SessionDetailed, DatabaseError> {
        let before = self.get_session_detailed(session_id)?;
        for lap in before.unsynced_laps() {
            self.put_lap(&Lap {
                synced: true,
                ..lap.lap.clone()
            })?;
        }
        Ok(before)
    }

    /// Ids of sessions holding unsynced laps, oldest session first.
    pub fn sessions_with_pending_laps(&self) -> Result<Vec<String>, DatabaseError> {
        self.read(Store::Session)?;
        self.read(Store::Lap)?;
        let mut stmt = self.tx.prepare(
            "SELECT s.id FROM session s
             WHERE EXISTS (SELECT 1 FROM lap l WHERE l.session_id = s.id AND l.synced = 0)
             ORDER BY s.date, s.id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<Settings> {
    Ok(Settings {
        id: row.get(0)?,
        number_of_laps: row.get(1)?,
        pool_meters: row.get(2)?,
        seconds_100m: row.get(3)?,
        start_delay_seconds: row.get(4)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        date: row.get::<_, DateTime<Utc>>(1)?,
        pool_meters: row.get(2)?,
    })
}

fn lap_from_row(row: &Row<'_>) -> rusqlite::Result<Lap> {
    Ok(Lap {
        id: row.get(0)?,
        session_id: row.get(1)?,
        idx: row.get(2)?,
        pool_meters: row.get(3)?,
        begin: row.get::<_, DateTime<Utc>>(4)?,
        seconds: row.get(5)?,
        expected_seconds: row.get(6)?,
        synced: row.get(7)?,
    })
}
