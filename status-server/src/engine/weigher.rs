//! Vote weighing
//!
//! A report counts for more when the submitter's own location data
//! corroborates it. First matching rule wins.

use chrono::{DateTime, Duration, Utc};

use crate::error::OracleError;
use crate::models::Report;
use crate::oracle::PopulationOracle;

pub const WEIGHT_UNVERIFIED: i32 = 1;
pub const WEIGHT_ON_LINE: i32 = 30;
pub const WEIGHT_ON_NETWORK: i32 = 20;
pub const WEIGHT_RECENT_TRIP: i32 = 10;
pub const WEIGHT_AUTHENTICATED: i32 = 5;

/// How far back a completed trip still corroborates a report
pub const RECENT_TRIP_WINDOW_MINS: i64 = 20;

/// Weight of `report` at `now`. Oracle failures propagate; the report must
/// then not be admitted.
pub async fn weigh(
    report: &Report,
    oracle: &dyn PopulationOracle,
    now: DateTime<Utc>,
) -> Result<i32, OracleError> {
    let submitter = match report.submitter {
        Some(s) if report.replay_protected => s,
        _ => return Ok(WEIGHT_UNVERIFIED),
    };

    if oracle.is_submitter_on_line(submitter, &report.line).await? {
        return Ok(WEIGHT_ON_LINE);
    }

    if oracle.is_submitter_on_network(submitter, &report.line.network_id).await? {
        return Ok(WEIGHT_ON_NETWORK);
    }

    let since = now - Duration::minutes(RECENT_TRIP_WINDOW_MINS);
    let trips = oracle.recent_trips_by(submitter, since).await?;
    if trips.iter().any(|t| t.end_time >= since) {
        return Ok(WEIGHT_RECENT_TRIP);
    }

    Ok(WEIGHT_AUTHENTICATED)
}
