//! Transit Status Server binary
//!
//! Wires the engine to its store, population oracle and notification sink,
//! then runs the background loops until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transit_status_server::{
    clock::{Clock, SystemClock},
    config::{Config, StoreBackend},
    db,
    engine::{report_store, scheduler, Engine},
    notify::{self, LogSink, NotificationDispatcher},
    oracle::{PgPopulationOracle, PopulationOracle, StaticOracle},
    store::{EntityStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "transit_status_server=debug,notifications=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Transit Status Server starting ({})...", config.environment);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (store, oracle): (Arc<dyn EntityStore>, Arc<dyn PopulationOracle>) = match config.store_backend {
        StoreBackend::Postgres => {
            tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
            let pool = db::create_pool(&config.database_url, config.db_max_connections)
                .await
                .context("failed to create database pool")?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;

            (
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgPopulationOracle::new(pool, clock.clone())),
            )
        }
        StoreBackend::Memory => {
            if config.is_production() {
                tracing::warn!("In-memory store in production: state is lost on restart");
            }
            (Arc::new(MemoryStore::new()), Arc::new(StaticOracle::new()))
        }
    };

    let (dispatcher, notifications) =
        NotificationDispatcher::channel(config.notification_queue_size, config.engine_settings().notification_timeout);
    let engine = Engine::new(store, oracle, dispatcher, clock, &config.engine_settings());
    let changes = engine.reports.on_change();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let delivery = tokio::spawn(notify::run_delivery_loop(
        notifications,
        Arc::new(LogSink),
        shutdown_rx.clone(),
    ));
    let sweep = tokio::spawn(report_store::ReportStore::run_expiry_sweep(
        engine.reports.clone(),
        config.sweep_interval(),
        shutdown_rx.clone(),
    ));
    let evaluation = tokio::spawn(scheduler::run_evaluation_loop(
        engine.evaluator.clone(),
        changes,
        config.evaluation_interval(),
        shutdown_rx,
    ));

    tracing::info!("🚀 Engine running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutting down...");
    shutdown_tx.send(true).ok();
    for (name, handle) in [("evaluation", evaluation), ("sweep", sweep), ("delivery", delivery)] {
        if let Err(e) = handle.await {
            tracing::error!("{} task ended abnormally: {}", name, e);
        }
    }

    Ok(())
}
