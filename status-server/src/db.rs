//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Simple protocol: the schema is several statements
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Lines
CREATE TABLE IF NOT EXISTS lines (
    id VARCHAR(64) PRIMARY KEY,
    network_id VARCHAR(64) NOT NULL,
    name VARCHAR(255) NOT NULL,
    closed BOOLEAN NOT NULL DEFAULT false
);

-- Status sources (operator feeds, community consensus)
CREATE TABLE IF NOT EXISTS sources (
    id VARCHAR(64) PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    official BOOLEAN NOT NULL
);

-- Statuses (append-only)
CREATE TABLE IF NOT EXISTS statuses (
    id UUID PRIMARY KEY,
    time TIMESTAMPTZ NOT NULL,
    line_id VARCHAR(64) NOT NULL REFERENCES lines(id),
    is_downtime BOOLEAN NOT NULL,
    text TEXT NOT NULL,
    source_id VARCHAR(64) NOT NULL REFERENCES sources(id),
    msg_type VARCHAR(100) NOT NULL
);

-- Disturbances (two timelines)
CREATE TABLE IF NOT EXISTS disturbances (
    id UUID PRIMARY KEY,
    line_id VARCHAR(64) NOT NULL REFERENCES lines(id),
    u_start_time TIMESTAMPTZ NOT NULL,
    u_end_time TIMESTAMPTZ,
    u_ended BOOLEAN NOT NULL DEFAULT false,
    official BOOLEAN NOT NULL DEFAULT false,
    o_start_time TIMESTAMPTZ,
    o_end_time TIMESTAMPTZ,
    o_ended BOOLEAN NOT NULL DEFAULT false
);

-- Ordered status history of each disturbance
CREATE TABLE IF NOT EXISTS disturbance_statuses (
    disturbance_id UUID NOT NULL REFERENCES disturbances(id) ON DELETE CASCADE,
    status_id UUID NOT NULL REFERENCES statuses(id),
    position INT NOT NULL,
    PRIMARY KEY (disturbance_id, status_id)
);

-- Realtime presence reported by apps (population oracle)
CREATE TABLE IF NOT EXISTS line_presence (
    submitter_id UUID NOT NULL,
    line_id VARCHAR(64) NOT NULL REFERENCES lines(id),
    network_id VARCHAR(64) NOT NULL,
    last_seen TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (submitter_id, line_id)
);

-- Completed trips (population oracle)
CREATE TABLE IF NOT EXISTS trips (
    id UUID PRIMARY KEY,
    submitter_id UUID NOT NULL,
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ NOT NULL
);

-- At most one open disturbance per line
CREATE UNIQUE INDEX IF NOT EXISTS uniq_disturbances_open_line ON disturbances(line_id) WHERE NOT u_ended;

-- Indexes
CREATE INDEX IF NOT EXISTS idx_statuses_line_time ON statuses(line_id, time);
CREATE INDEX IF NOT EXISTS idx_disturbances_line ON disturbances(line_id, u_end_time);
CREATE INDEX IF NOT EXISTS idx_presence_seen ON line_presence(last_seen);
CREATE INDEX IF NOT EXISTS idx_trips_submitter_end ON trips(submitter_id, end_time);
"#;
