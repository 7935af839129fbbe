//! PostgreSQL entity store
//!
//! Line transactions take `pg_advisory_xact_lock(hashtext(line_id))`, which
//! is released on commit or rollback. The partial unique index on open
//! disturbances backs the one-open-per-line rule if a writer bypasses the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{EntityStore, LineTx};
use crate::error::StoreError;
use crate::models::{Disturbance, Line, MessageType, Source, Status};

const STATUS_COLUMNS: &str = r#"
    s.id, s.time, s.line_id, s.is_downtime, s.text, s.msg_type,
    src.id AS source_id, src.name AS source_name, src.official AS source_official
"#;

#[derive(Debug, FromRow)]
struct StatusRow {
    id: Uuid,
    time: DateTime<Utc>,
    line_id: String,
    is_downtime: bool,
    text: String,
    msg_type: String,
    source_id: String,
    source_name: String,
    source_official: bool,
}

impl From<StatusRow> for Status {
    fn from(row: StatusRow) -> Self {
        let msg_type = row.msg_type.parse().unwrap_or_else(|e| {
            tracing::warn!("Status {} has {}; treating as raw", row.id, e);
            MessageType::Raw
        });
        Status {
            id: row.id,
            time: row.time,
            line_id: row.line_id,
            is_downtime: row.is_downtime,
            text: row.text,
            source: Source {
                id: row.source_id,
                name: row.source_name,
                official: row.source_official,
            },
            msg_type,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_statuses<'e, E>(executor: E, disturbance: &mut Disturbance) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {STATUS_COLUMNS}
            FROM disturbance_statuses ds
            JOIN statuses s ON s.id = ds.status_id
            JOIN sources src ON src.id = s.source_id
            WHERE ds.disturbance_id = $1
            ORDER BY ds.position ASC
            "#
        );
        let rows = sqlx::query_as::<_, StatusRow>(&sql)
            .bind(disturbance.id)
            .fetch_all(executor)
            .await?;
        disturbance.statuses = rows.into_iter().map(Status::from).collect();
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn begin_line(&self, line_id: &str) -> Result<Box<dyn LineTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(line_id)
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgLineTx {
            tx: Some(tx),
            line_id: line_id.to_string(),
        }))
    }

    async fn lines(&self) -> Result<Vec<Line>, StoreError> {
        let lines = sqlx::query_as::<_, Line>("SELECT * FROM lines ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(lines)
    }

    async fn line(&self, id: &str) -> Result<Option<Line>, StoreError> {
        let line = sqlx::query_as::<_, Line>("SELECT * FROM lines WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(line)
    }

    async fn save_line(&self, line: &Line) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO lines (id, network_id, name, closed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                network_id = EXCLUDED.network_id,
                name = EXCLUDED.name,
                closed = EXCLUDED.closed
            "#,
        )
        .bind(&line.id)
        .bind(&line.network_id)
        .bind(&line.name)
        .bind(line.closed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn disturbances_for_line(&self, line_id: &str) -> Result<Vec<Disturbance>, StoreError> {
        let mut disturbances = sqlx::query_as::<_, Disturbance>(
            "SELECT * FROM disturbances WHERE line_id = $1 ORDER BY u_start_time ASC",
        )
        .bind(line_id)
        .fetch_all(&self.pool)
        .await?;

        for d in disturbances.iter_mut() {
            Self::attach_statuses(&self.pool, d).await?;
        }
        Ok(disturbances)
    }

    async fn statuses_for_line(&self, line_id: &str) -> Result<Vec<Status>, StoreError> {
        let sql = format!(
            r#"
            SELECT {STATUS_COLUMNS}
            FROM statuses s
            JOIN sources src ON src.id = s.source_id
            WHERE s.line_id = $1
            ORDER BY s.time ASC
            "#
        );
        let rows = sqlx::query_as::<_, StatusRow>(&sql)
            .bind(line_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Status::from).collect())
    }

    async fn latest_status_for_line(&self, line_id: &str) -> Result<Option<Status>, StoreError> {
        let sql = format!(
            r#"
            SELECT {STATUS_COLUMNS}
            FROM statuses s
            JOIN sources src ON src.id = s.source_id
            WHERE s.line_id = $1
            ORDER BY s.time DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, StatusRow>(&sql)
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Status::from))
    }
}

struct PgLineTx {
    tx: Option<Transaction<'static, Postgres>>,
    line_id: String,
}

impl PgLineTx {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("transaction already finished".to_string()))
    }
}

#[async_trait]
impl LineTx for PgLineTx {
    async fn open_disturbance(&mut self) -> Result<Option<Disturbance>, StoreError> {
        let line_id = self.line_id.clone();
        let tx = self.tx()?;
        let open = sqlx::query_as::<_, Disturbance>(
            "SELECT * FROM disturbances WHERE line_id = $1 AND NOT u_ended LIMIT 1",
        )
        .bind(&line_id)
        .fetch_optional(&mut **tx)
        .await?;

        match open {
            Some(mut d) => {
                PgStore::attach_statuses(&mut **tx, &mut d).await?;
                Ok(Some(d))
            }
            None => Ok(None),
        }
    }

    async fn last_closed_disturbance(&mut self) -> Result<Option<Disturbance>, StoreError> {
        let line_id = self.line_id.clone();
        let tx = self.tx()?;
        let closed = sqlx::query_as::<_, Disturbance>(
            r#"
            SELECT * FROM disturbances
            WHERE line_id = $1 AND u_ended
            ORDER BY u_end_time DESC
            LIMIT 1
            "#,
        )
        .bind(&line_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(closed)
    }

    async fn save_disturbance(&mut self, d: &Disturbance) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO disturbances (id, line_id, u_start_time, u_end_time, u_ended, official, o_start_time, o_end_time, o_ended)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                u_end_time = EXCLUDED.u_end_time,
                u_ended = EXCLUDED.u_ended,
                official = EXCLUDED.official,
                o_start_time = EXCLUDED.o_start_time,
                o_end_time = EXCLUDED.o_end_time,
                o_ended = EXCLUDED.o_ended
            "#,
        )
        .bind(d.id)
        .bind(&d.line_id)
        .bind(d.u_start_time)
        .bind(d.u_end_time)
        .bind(d.u_ended)
        .bind(d.official)
        .bind(d.o_start_time)
        .bind(d.o_end_time)
        .bind(d.o_ended)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("open disturbance already exists: {}", db.message()))
            }
            other => StoreError::Database(other),
        })?;
        Ok(())
    }

    async fn insert_status(&mut self, status: &Status, disturbance_id: Option<Uuid>) -> Result<(), StoreError> {
        let tx = self.tx()?;

        sqlx::query(
            "INSERT INTO sources (id, name, official) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&status.source.id)
        .bind(&status.source.name)
        .bind(status.source.official)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO statuses (id, time, line_id, is_downtime, text, source_id, msg_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(status.id)
        .bind(status.time)
        .bind(&status.line_id)
        .bind(status.is_downtime)
        .bind(&status.text)
        .bind(&status.source.id)
        .bind(status.msg_type.to_string())
        .execute(&mut **tx)
        .await?;

        if let Some(disturbance_id) = disturbance_id {
            sqlx::query(
                r#"
                INSERT INTO disturbance_statuses (disturbance_id, status_id, position)
                VALUES ($1, $2, (SELECT COUNT(*) FROM disturbance_statuses WHERE disturbance_id = $1))
                "#,
            )
            .bind(disturbance_id)
            .bind(status.id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => {
                tx.commit().await?;
                Ok(())
            }
            None => Err(StoreError::Unavailable("transaction already finished".to_string())),
        }
    }
}
