//! Timeline invariant audit

use serde::Serialize;

use crate::error::StoreError;
use crate::store::EntityStore;

#[derive(Debug, Default, Clone, Serialize)]
pub struct AuditReport {
    pub line_id: String,
    pub disturbances: usize,
    pub open: usize,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check a line's whole history against the timeline invariants
pub async fn audit_line(store: &dyn EntityStore, line_id: &str) -> Result<AuditReport, StoreError> {
    let disturbances = store.disturbances_for_line(line_id).await?;
    let mut report = AuditReport {
        line_id: line_id.to_string(),
        disturbances: disturbances.len(),
        open: disturbances.iter().filter(|d| d.is_open()).count(),
        violations: Vec::new(),
    };

    if report.open > 1 {
        report.violations.push(format!("{} open disturbances", report.open));
    }

    for d in &disturbances {
        for problem in d.violations() {
            report.violations.push(format!("disturbance {}: {}", d.id, problem));
        }
        if d.statuses.is_empty() {
            report.violations.push(format!("disturbance {} has no statuses", d.id));
        }
    }

    if !report.is_clean() {
        tracing::warn!("Line {} fails audit: {:?}", line_id, report.violations);
    }
    Ok(report)
}
