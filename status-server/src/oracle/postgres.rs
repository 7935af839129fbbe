//! Population oracle over the presence and trip tables

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::PopulationOracle;
use crate::clock::Clock;
use crate::error::OracleError;
use crate::models::{Line, SubmitterId, Trip};

/// Presence older than this no longer counts as "currently riding"
const PRESENCE_WINDOW_SECS: i64 = 120;

#[derive(Clone)]
pub struct PgPopulationOracle {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgPopulationOracle {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn presence_cutoff(&self) -> DateTime<Utc> {
        presence_cutoff(self.clock.now())
    }
}

fn presence_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(PRESENCE_WINDOW_SECS)
}

#[async_trait]
impl PopulationOracle for PgPopulationOracle {
    async fn users_on_line(&self, line: &Line) -> Result<i64, OracleError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT submitter_id) FROM line_presence WHERE line_id = $1 AND last_seen >= $2",
        )
        .bind(&line.id)
        .bind(self.presence_cutoff())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn is_submitter_on_line(&self, submitter: SubmitterId, line: &Line) -> Result<bool, OracleError> {
        let present: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM line_presence
                WHERE submitter_id = $1 AND line_id = $2 AND last_seen >= $3
            )
            "#,
        )
        .bind(submitter.0)
        .bind(&line.id)
        .bind(self.presence_cutoff())
        .fetch_one(&self.pool)
        .await?;
        Ok(present)
    }

    async fn is_submitter_on_network(&self, submitter: SubmitterId, network_id: &str) -> Result<bool, OracleError> {
        let present: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM line_presence
                WHERE submitter_id = $1 AND network_id = $2 AND last_seen >= $3
            )
            "#,
        )
        .bind(submitter.0)
        .bind(network_id)
        .bind(self.presence_cutoff())
        .fetch_one(&self.pool)
        .await?;
        Ok(present)
    }

    async fn recent_trips_by(&self, submitter: SubmitterId, since: DateTime<Utc>) -> Result<Vec<Trip>, OracleError> {
        let trips = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE submitter_id = $1 AND end_time >= $2 ORDER BY end_time DESC",
        )
        .bind(submitter.0)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(trips)
    }
}
