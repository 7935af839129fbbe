//! Consensus Evaluator
//!
//! Turns accumulated report votes into synthesized community statuses.
//! Runs per line, inside the line's transaction, so two triggers racing on
//! the same line cannot both start a disturbance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::report_store::ReportStore;
use super::state_machine::{DisturbanceMachine, LineSession};
use super::threshold::{keep_alive_threshold, start_threshold};
use crate::clock::Clock;
use crate::error::{EngineResult, StoreError};
use crate::models::{Disturbance, Line, LineState, MessageType, Source, Status};
use crate::oracle::PopulationOracle;
use crate::store::EntityStore;

pub const TEXT_BEGIN: &str = "Users report problems on the line";
pub const TEXT_CONFIRM: &str = "Several users confirm problems on the line";
pub const TEXT_RECONFIRM: &str = "Users report new problems on the line";
pub const TEXT_SOLVED: &str = "Users no longer report problems on the line";

/// Reports older than this are backdated with a separate begin status
const BACKDATE_AFTER_SECS: i64 = 60;

/// What one evaluation did to a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineOutcome {
    Unchanged,
    /// Crowd disturbance started; `backdated` when a begin status preceded the confirm
    Started { backdated: bool },
    /// New disturbance following one that ended after the earliest pending vote
    Reconfirmed,
    Solved,
    /// Votes discarded because the operator tracks the disturbance
    VotesCleared,
}

/// Result of a pass over every line
#[derive(Debug, Default, Clone, Serialize)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub started: usize,
    pub solved: usize,
    pub cleared: usize,
    pub failed: Vec<String>,
}

pub struct ConsensusEvaluator {
    store: Arc<dyn EntityStore>,
    reports: Arc<ReportStore>,
    oracle: Arc<dyn PopulationOracle>,
    machine: Arc<DisturbanceMachine>,
    clock: Arc<dyn Clock>,
}

impl ConsensusEvaluator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        reports: Arc<ReportStore>,
        oracle: Arc<dyn PopulationOracle>,
        machine: Arc<DisturbanceMachine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, reports, oracle, machine, clock }
    }

    /// Evaluate every line. A failing line is logged and skipped; the pass continues.
    pub async fn evaluate_all(&self) -> EngineResult<EvaluationSummary> {
        let lines = self.store.lines().await?;
        let mut summary = EvaluationSummary::default();

        for line in &lines {
            summary.evaluated += 1;
            match self.evaluate_line(line).await {
                Ok(LineOutcome::Started { .. }) | Ok(LineOutcome::Reconfirmed) => summary.started += 1,
                Ok(LineOutcome::Solved) => summary.solved += 1,
                Ok(LineOutcome::VotesCleared) => summary.cleared += 1,
                Ok(LineOutcome::Unchanged) => {}
                Err(e) => {
                    tracing::warn!("Consensus evaluation failed for line {}: {}", line.id, e);
                    summary.failed.push(line.id.clone());
                }
            }
        }

        Ok(summary)
    }

    /// Evaluate a line by id (change-triggered path)
    pub async fn evaluate_line_id(&self, line_id: &str) -> EngineResult<LineOutcome> {
        match self.store.line(line_id).await? {
            Some(line) => self.evaluate_line(&line).await,
            None => Err(StoreError::Corrupt(format!("reports reference unknown line {line_id}")).into()),
        }
    }

    pub async fn evaluate_line(&self, line: &Line) -> EngineResult<LineOutcome> {
        let users = self.oracle.users_on_line(line).await?;
        let mut session = self.machine.begin(&line.id).await?;
        let votes = self.reports.votes_for_line(&line.id);

        let state = session
            .open_disturbance()
            .map_or(LineState::Idle, Disturbance::state);

        let outcome = match state {
            LineState::Idle => {
                let threshold = start_threshold(users);
                if votes < threshold {
                    return Ok(LineOutcome::Unchanged);
                }
                tracing::info!(
                    "Line {} reached {} votes (threshold {}, {} users on line)",
                    line.id, votes, threshold, users
                );
                self.start(&mut session).await?
            }
            LineState::OfficialOpen => {
                let cleared = self.reports.clear_line(&line.id);
                if cleared == 0 {
                    return Ok(LineOutcome::Unchanged);
                }
                tracing::debug!("Cleared {} pending reports for officially tracked line {}", cleared, line.id);
                LineOutcome::VotesCleared
            }
            LineState::UnofficialOpen => {
                let keep_alive = keep_alive_threshold(users);
                if votes >= keep_alive {
                    return Ok(LineOutcome::Unchanged);
                }
                tracing::info!("Line {} down to {} votes (keep-alive {})", line.id, votes, keep_alive);
                let solved = self.synthesize(&line.id, false, TEXT_SOLVED, MessageType::ReportSolved, None);
                self.machine.apply(&mut session, solved, true).await?;
                LineOutcome::Solved
            }
        };

        self.machine.finish(session).await?;
        Ok(outcome)
    }

    async fn start(&self, session: &mut LineSession) -> EngineResult<LineOutcome> {
        let now = self.clock.now();
        let line_id = session.line_id().to_string();
        let Some(earliest) = self.reports.earliest_for_line(&line_id) else {
            return Ok(LineOutcome::Unchanged);
        };

        let ended_after_earliest = session
            .last_closed()
            .await?
            .and_then(|d| d.u_end_time)
            .is_some_and(|end| end > earliest.time);

        if ended_after_earliest {
            let reconfirm = self.synthesize(&line_id, true, TEXT_RECONFIRM, MessageType::ReportReconfirm, None);
            self.machine.apply(session, reconfirm, true).await?;
            return Ok(LineOutcome::Reconfirmed);
        }

        let backdated = now - earliest.time > Duration::seconds(BACKDATE_AFTER_SECS);
        if backdated {
            let begin = self.synthesize(&line_id, true, TEXT_BEGIN, MessageType::ReportBegin, Some(earliest.time));
            self.machine.apply(session, begin, false).await?;
        }
        let confirm = self.synthesize(&line_id, true, TEXT_CONFIRM, MessageType::ReportConfirm, None);
        self.machine.apply(session, confirm, true).await?;

        Ok(LineOutcome::Started { backdated })
    }

    fn synthesize(
        &self,
        line_id: &str,
        downtime: bool,
        text: &str,
        msg_type: MessageType,
        at: Option<DateTime<Utc>>,
    ) -> Status {
        let time = at.unwrap_or_else(|| self.clock.now());
        Status::new(line_id, time, downtime, text, Source::community()).with_type(msg_type)
    }
}
