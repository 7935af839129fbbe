//! Report intake: line checks, weighing, admission

use std::sync::Arc;

use super::report_store::ReportStore;
use super::weigher;
use crate::clock::Clock;
use crate::error::SubmitError;
use crate::models::Report;
use crate::oracle::PopulationOracle;
use crate::store::EntityStore;

pub struct ReportIntake {
    store: Arc<dyn EntityStore>,
    reports: Arc<ReportStore>,
    oracle: Arc<dyn PopulationOracle>,
    clock: Arc<dyn Clock>,
}

impl ReportIntake {
    pub fn new(
        store: Arc<dyn EntityStore>,
        reports: Arc<ReportStore>,
        oracle: Arc<dyn PopulationOracle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, reports, oracle, clock }
    }

    /// Admit a report; returns the weight it was admitted with.
    ///
    /// The line is re-read from the store so an administrative closure takes
    /// effect even when the caller holds a stale copy. The report is stamped
    /// with its arrival time; client clocks are not trusted.
    pub async fn submit(&self, mut report: Report) -> Result<i32, SubmitError> {
        let line = self
            .store
            .line(&report.line.id)
            .await?
            .ok_or_else(|| SubmitError::UnknownLine(report.line.id.clone()))?;

        if line.closed {
            tracing::debug!("Rejected report for closed line {}", line.id);
            return Err(SubmitError::LineClosed(line.id));
        }
        report.line = line;

        let now = self.clock.now();
        if report.time != now {
            tracing::debug!(
                "Report for line {} claimed time {}; using arrival time {}",
                report.line.id, report.time, now
            );
            report.time = now;
        }

        let weight = weigher::weigh(&report, self.oracle.as_ref(), now)
            .await
            .map_err(|e| {
                tracing::warn!("Could not weigh report for line {}: {}", report.line.id, e);
                e
            })?;

        self.reports.submit(report, weight)?;
        Ok(weight)
    }
}
