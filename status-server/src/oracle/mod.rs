//! Population oracle - who is riding what, right now

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::OracleError;
use crate::models::{Line, SubmitterId, Trip};

pub use memory::StaticOracle;
pub use postgres::PgPopulationOracle;

#[async_trait]
pub trait PopulationOracle: Send + Sync {
    /// Estimated number of people currently riding `line`
    async fn users_on_line(&self, line: &Line) -> Result<i64, OracleError>;

    async fn is_submitter_on_line(&self, submitter: SubmitterId, line: &Line) -> Result<bool, OracleError>;

    async fn is_submitter_on_network(&self, submitter: SubmitterId, network_id: &str) -> Result<bool, OracleError>;

    /// Trips by `submitter` that ended at or after `since`
    async fn recent_trips_by(&self, submitter: SubmitterId, since: DateTime<Utc>) -> Result<Vec<Trip>, OracleError>;
}
