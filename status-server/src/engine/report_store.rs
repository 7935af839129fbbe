//! Weighted report store
//!
//! Pending reports keyed by rate limiter key (line + submitter), each living
//! for a fixed TTL. Insertions and expiries are announced on the change
//! channel so the consensus evaluator can re-run for the affected line.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::clock::Clock;
use crate::error::RateLimited;
use crate::models::{RateLimiterKey, Report};

/// Default report time-to-live
pub const REPORT_TTL_MINS: i64 = 15;

const CHANGE_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct WeightedReport {
    pub report: Report,
    pub weight: i32,
    pub expires_at: DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Expired,
}

/// Something changed for `line_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStoreEvent {
    pub line_id: String,
    pub kind: ChangeKind,
}

pub struct ReportStore {
    entries: Mutex<HashMap<RateLimiterKey, WeightedReport>>,
    listener: Mutex<Option<mpsc::Sender<ReportStoreEvent>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ReportStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            ttl,
            clock,
        }
    }

    /// Register the change hook; replaces any previous one
    pub fn on_change(&self) -> mpsc::Receiver<ReportStoreEvent> {
        let (tx, rx) = mpsc::channel(CHANGE_QUEUE_SIZE);
        *self.listener.lock() = Some(tx);
        rx
    }

    /// Admit `report` unless a live entry already exists for its key
    pub fn submit(&self, report: Report, weight: i32) -> Result<(), RateLimited> {
        let now = self.clock.now();
        let key = report.rate_limiter_key();
        let line_id = report.line.id.clone();

        {
            let mut entries = self.entries.lock();
            if entries.get(&key).is_some_and(|e| e.expires_at > now) {
                tracing::debug!("Rate limited report for line {} (key {})", line_id, key.as_str());
                return Err(RateLimited);
            }
            entries.insert(
                key,
                WeightedReport {
                    report,
                    weight,
                    expires_at: now + self.ttl,
                },
            );
        }

        tracing::debug!("Admitted report for line {} with weight {}", line_id, weight);
        self.notify(line_id, ChangeKind::Added);
        Ok(())
    }

    /// Sum of live weights for the line
    pub fn votes_for_line(&self, line_id: &str) -> i32 {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now && e.report.line.id == line_id)
            .map(|e| e.weight)
            .sum()
    }

    /// Oldest live report for the line
    pub fn earliest_for_line(&self, line_id: &str) -> Option<Report> {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now && e.report.line.id == line_id)
            .min_by_key(|e| e.report.time)
            .map(|e| e.report.clone())
    }

    /// Drop every pending report for the line; returns how many were removed
    pub fn clear_line(&self, line_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.report.line.id != line_id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict expired entries, announcing each affected line once
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut lines = BTreeSet::new();
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, e| {
                if e.expires_at > now {
                    true
                } else {
                    lines.insert(e.report.line.id.clone());
                    false
                }
            });
            before - entries.len()
        };

        if removed > 0 {
            tracing::debug!("Expired {} reports across {} lines", removed, lines.len());
        }
        for line_id in lines {
            self.notify(line_id, ChangeKind::Expired);
        }
        removed
    }

    fn notify(&self, line_id: String, kind: ChangeKind) {
        let listener = self.listener.lock().clone();
        if let Some(tx) = listener {
            // A full queue is fine: the periodic evaluation picks the line up
            if let Err(e) = tx.try_send(ReportStoreEvent { line_id, kind }) {
                tracing::debug!("Report change event not queued: {}", e);
            }
        }
    }

    /// Periodically evict expired reports until shutdown
    pub async fn run_expiry_sweep(self: Arc<Self>, every: StdDuration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("Report expiry sweep started (every {:?})", every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.purge_expired();
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Report expiry sweep stopped");
    }
}
