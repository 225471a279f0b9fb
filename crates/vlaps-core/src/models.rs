//! Persisted records and their derived views.
//!
//! [`Settings`], [`Session`] and [`Lap`] are owned by the local store.
//! [`LapDetailed`] and [`SessionDetailed`] are computed on read by
//! [`crate::aggregate::detail`] and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

pub const DEFAULT_NUMBER_OF_LAPS: u32 = 10;
pub const DEFAULT_POOL_METERS: f64 = 25.0;
pub const DEFAULT_SECONDS_100M: f64 = 90.0;
pub const DEFAULT_START_DELAY_SECONDS: f64 = 5.0;

/// A training profile. One of them is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: String,
    pub number_of_laps: u32,
    pub pool_meters: f64,
    /// Pace reference: seconds per 100 m.
    pub seconds_100m: f64,
    pub start_delay_seconds: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            number_of_laps: DEFAULT_NUMBER_OF_LAPS,
            pool_meters: DEFAULT_POOL_METERS,
            seconds_100m: DEFAULT_SECONDS_100M,
            start_delay_seconds: DEFAULT_START_DELAY_SECONDS,
        }
    }
}

impl Settings {
    /// Scheduled duration of one lap (there and back).
    pub fn seconds_lap(&self) -> f64 {
        self.seconds_100m / 100.0 * 2.0 * self.pool_meters
    }

    pub fn total_distance(&self) -> f64 {
        f64::from(self.number_of_laps) * 2.0 * self.pool_meters
    }

    pub fn total_time_seconds(&self) -> f64 {
        (self.seconds_100m * self.total_distance() / 100.0).round()
    }

    pub fn minutes_seconds_100m(&self) -> (u32, u32) {
        split_minutes(self.seconds_100m)
    }

    pub fn minutes_seconds_lap(&self) -> (u32, u32) {
        split_minutes(self.seconds_lap())
    }

    /// A session is done once the last recorded idx reaches the lap count.
    pub fn is_session_complete(&self, last_idx: u32) -> bool {
        last_idx >= self.number_of_laps
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.number_of_laps == 0 {
            return Err(DatabaseError::InvalidSettings(
                "numberOfLaps must be greater than 0".into(),
            ));
        }
        if !(self.pool_meters > 0.0) {
            return Err(DatabaseError::InvalidSettings(
                "poolMeters must be greater than 0".into(),
            ));
        }
        if !(self.seconds_100m > 0.0) {
            return Err(DatabaseError::InvalidSettings(
                "seconds100m must be greater than 0".into(),
            ));
        }
        if !(self.start_delay_seconds >= 0.0) {
            return Err(DatabaseError::InvalidSettings(
                "startDelaySeconds must not be negative".into(),
            ));
        }
        Ok(())
    }
}

fn split_minutes(seconds: f64) -> (u32, u32) {
    let whole = seconds.max(0.0).floor() as u32;
    (whole / 60, whole % 60)
}

/// One timed run. `pool_meters` is frozen at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub date: DateTime<Utc>,
    pub pool_meters: f64,
}

impl Session {
    pub fn new(pool_meters: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date: Utc::now(),
            pool_meters,
        }
    }
}

/// One completed lap. Only `synced` ever changes after capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub id: String,
    pub session_id: String,
    /// 1-based position; may skip values when a lap spans several intervals.
    pub idx: u32,
    pub pool_meters: f64,
    pub begin: DateTime<Utc>,
    pub seconds: f64,
    pub expected_seconds: f64,
    #[serde(default)]
    pub synced: bool,
}

impl Lap {
    pub fn delay_seconds(&self) -> f64 {
        self.seconds - self.expected_seconds
    }

    pub fn lap_meters(&self) -> f64 {
        self.pool_meters * 2.0
    }
}

/// Running totals up to and including one lap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapTotals {
    pub acc_meters: f64,
    pub acc_seconds: f64,
    pub acc_expected_seconds: f64,
    pub delay_seconds: f64,
    pub acc_delay_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapDetailed {
    #[serde(flatten)]
    pub lap: Lap,
    #[serde(flatten)]
    pub totals: LapTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailed {
    #[serde(flatten)]
    pub session: Session,
    pub laps: Vec<LapDetailed>,
}

impl SessionDetailed {
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// True iff no lap is waiting for delivery.
    pub fn synced(&self) -> bool {
        self.laps.iter().all(|l| l.lap.synced)
    }

    pub fn distance(&self) -> f64 {
        self.last_totals().acc_meters
    }

    pub fn seconds(&self) -> f64 {
        self.last_totals().acc_seconds
    }

    /// Delay of the final lap.
    pub fn delay_seconds(&self) -> f64 {
        self.last_totals().delay_seconds
    }

    /// Delay accumulated over the whole session.
    pub fn acc_delay_seconds(&self) -> f64 {
        self.last_totals().acc_delay_seconds
    }

    pub fn last_idx(&self) -> u32 {
        self.laps.last().map(|l| l.lap.idx).unwrap_or(0)
    }

    pub fn unsynced_laps(&self) -> impl Iterator<Item = &LapDetailed> {
        self.laps.iter().filter(|l| !l.lap.synced)
    }

    fn last_totals(&self) -> LapTotals {
        self.laps.last().map(|l| l.totals).unwrap_or_default()
    }
}
