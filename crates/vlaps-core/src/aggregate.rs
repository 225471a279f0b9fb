//! Running totals over a session's laps.

use crate::models::{Lap, LapDetailed, LapTotals, Session, SessionDetailed};

/// Fold `laps` (ordered by idx) into a [`SessionDetailed`].
///
/// Every lap adds one fixed lap length of the session's pool. Inputs are
/// cloned, never mutated.
pub fn detail(session: &Session, laps: &[Lap]) -> SessionDetailed {
    let lap_meters = session.pool_meters * 2.0;
    let mut acc = LapTotals::default();
    let laps = laps
        .iter()
        .map(|lap| {
            let delay_seconds = lap.delay_seconds();
            acc = LapTotals {
                acc_meters: acc.acc_meters + lap_meters,
                acc_seconds: acc.acc_seconds + lap.seconds,
                acc_expected_seconds: acc.acc_expected_seconds + lap.expected_seconds,
                delay_seconds,
                acc_delay_seconds: acc.acc_delay_seconds + delay_seconds,
            };
            LapDetailed {
                lap: lap.clone(),
                totals: acc,
            }
        })
        .collect();

    SessionDetailed {
        session: session.clone(),
        laps,
    }
}
