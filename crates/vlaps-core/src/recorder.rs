//! Turning a swimmer's tap into a lap record.
//!
//! A tap ends the current lap. The time since the lap began is measured
//! against the scheduled lap duration: a slow swimmer who taps after two
//! intervals gets an idx that skips one value, a tap well before the first
//! interval is ignored.

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::models::{Lap, Settings};
use crate::storage::Txn;

/// Interval arithmetic for one active profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LapClock {
    seconds_lap: f64,
}

impl LapClock {
    pub fn new(settings: &Settings) -> Self {
        Self {
            seconds_lap: settings.seconds_lap(),
        }
    }

    pub fn seconds_lap(&self) -> f64 {
        self.seconds_lap
    }

    /// Scheduled intervals elapsed, rounded to the nearest whole one.
    pub fn intervals_elapsed(&self, elapsed_seconds: f64) -> u32 {
        if !(self.seconds_lap > 0.0) || !(elapsed_seconds > 0.0) {
            return 0;
        }
        (elapsed_seconds / self.seconds_lap).round() as u32
    }
}

/// Build the next lap of a session, or `None` if the tap came too early.
///
/// # Errors
/// Returns [`DatabaseError::IdxOverflow`] when the elapsed time spans more
/// intervals than an idx can count.
pub fn next_lap(
    settings: &Settings,
    session_id: &str,
    last_idx: u32,
    begin: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Lap>, DatabaseError> {
    let clock = LapClock::new(settings);
    let seconds = (now - begin).num_milliseconds() as f64 / 1000.0;
    let intervals = clock.intervals_elapsed(seconds);
    if intervals == 0 {
        return Ok(None);
    }
    let idx = last_idx
        .checked_add(intervals)
        .ok_or_else(|| DatabaseError::IdxOverflow {
            session_id: session_id.to_string(),
            last_idx,
            seconds,
        })?;
    Ok(Some(Lap {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        idx,
        pool_meters: settings.pool_meters,
        begin,
        seconds,
        expected_seconds: clock.seconds_lap(),
        synced: false,
    }))
}

/// Record the lap that began at `begin` and ended at `now`.
///
/// The transaction needs the session and lap stores in read-write mode.
pub fn record_lap(
    txn: &mut Txn<'_>,
    session_id: &str,
    settings: &Settings,
    begin: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Lap>, DatabaseError> {
    txn.get_session(session_id)?;
    let last_idx = txn.last_lap_idx(session_id)?;
    let Some(lap) = next_lap(settings, session_id, last_idx, begin, now)? else {
        return Ok(None);
    };
    txn.put_lap(&lap)?;
    tracing::debug!(session_id, idx = lap.idx, seconds = lap.seconds, "lap recorded");
    Ok(Some(lap))
}
