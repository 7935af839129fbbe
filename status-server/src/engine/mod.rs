//! Disturbance detection and consensus engine
//!
//! ```text
//!   reports ──► ReportIntake ──► weigher ──► ReportStore ──(change)──┐
//!                                                                    ▼
//!   feeds ──► FeedPoller ──────────────┐              ConsensusEvaluator ◄── tick
//!                                      ▼                             │
//!                              DisturbanceMachine ◄──────────────────┘
//!                                      │
//!                          EntityStore + NotificationDispatcher
//! ```

pub mod audit;
pub mod classifier;
pub mod consensus;
pub mod intake;
pub mod report_store;
pub mod scheduler;
pub mod scraper;
pub mod state_machine;
pub mod threshold;
pub mod weigher;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::notify::NotificationDispatcher;
use crate::oracle::PopulationOracle;
use crate::store::EntityStore;

pub use consensus::{ConsensusEvaluator, EvaluationSummary, LineOutcome};
pub use intake::ReportIntake;
pub use report_store::{ReportStore, ReportStoreEvent};
pub use state_machine::{DisturbanceMachine, Transition};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub report_ttl: chrono::Duration,
    pub notification_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            report_ttl: chrono::Duration::minutes(report_store::REPORT_TTL_MINS),
            notification_timeout: Duration::from_secs(2),
        }
    }
}

/// The wired engine: shared by scheduler loops, feed pollers and report intake
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn EntityStore>,
    pub reports: Arc<ReportStore>,
    pub machine: Arc<DisturbanceMachine>,
    pub evaluator: Arc<ConsensusEvaluator>,
    pub intake: Arc<ReportIntake>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        oracle: Arc<dyn PopulationOracle>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        settings: &EngineSettings,
    ) -> Self {
        let reports = Arc::new(ReportStore::new(clock.clone(), settings.report_ttl));
        let machine = Arc::new(DisturbanceMachine::new(store.clone(), dispatcher));
        let evaluator = Arc::new(ConsensusEvaluator::new(
            store.clone(),
            reports.clone(),
            oracle.clone(),
            machine.clone(),
            clock.clone(),
        ));
        let intake = Arc::new(ReportIntake::new(store.clone(), reports.clone(), oracle, clock));

        Self {
            store,
            reports,
            machine,
            evaluator,
            intake,
        }
    }
}
