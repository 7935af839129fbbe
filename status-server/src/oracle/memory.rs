//! Scriptable in-memory population oracle

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::PopulationOracle;
use crate::error::OracleError;
use crate::models::{Line, SubmitterId, Trip};

#[derive(Default)]
struct Population {
    users_on_line: HashMap<String, i64>,
    riding: HashMap<SubmitterId, (String, String)>,
    trips: Vec<Trip>,
}

/// Oracle backed by explicitly set presence data
#[derive(Default)]
pub struct StaticOracle {
    population: RwLock<Population>,
    unavailable: AtomicBool,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_users_on_line(&self, line_id: &str, count: i64) {
        self.population
            .write()
            .users_on_line
            .insert(line_id.to_string(), count);
    }

    /// Place `submitter` on `line` (and therefore on its network)
    pub fn set_riding(&self, submitter: SubmitterId, line: &Line) {
        self.population
            .write()
            .riding
            .insert(submitter, (line.id.clone(), line.network_id.clone()));
    }

    pub fn add_trip(&self, trip: Trip) {
        self.population.write().trips.push(trip);
    }

    /// Make every query fail, as if the presence store were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), OracleError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OracleError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl PopulationOracle for StaticOracle {
    async fn users_on_line(&self, line: &Line) -> Result<i64, OracleError> {
        self.check()?;
        Ok(self
            .population
            .read()
            .users_on_line
            .get(&line.id)
            .copied()
            .unwrap_or(0))
    }

    async fn is_submitter_on_line(&self, submitter: SubmitterId, line: &Line) -> Result<bool, OracleError> {
        self.check()?;
        Ok(self
            .population
            .read()
            .riding
            .get(&submitter)
            .is_some_and(|(line_id, _)| *line_id == line.id))
    }

    async fn is_submitter_on_network(&self, submitter: SubmitterId, network_id: &str) -> Result<bool, OracleError> {
        self.check()?;
        Ok(self
            .population
            .read()
            .riding
            .get(&submitter)
            .is_some_and(|(_, network)| network == network_id))
    }

    async fn recent_trips_by(&self, submitter: SubmitterId, since: DateTime<Utc>) -> Result<Vec<Trip>, OracleError> {
        self.check()?;
        Ok(self
            .population
            .read()
            .trips
            .iter()
            .filter(|t| t.submitter_id == submitter.0 && t.end_time >= since)
            .cloned()
            .collect())
    }
}
