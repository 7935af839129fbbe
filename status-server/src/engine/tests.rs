//! Engine scenario tests
//!
//! Whole-engine flows against the in-memory store, a scripted population
//! oracle and a manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::clock::{Clock, ManualClock};
use crate::engine::audit::audit_line;
use crate::engine::consensus::{LineOutcome, TEXT_CONFIRM, TEXT_RECONFIRM};
use crate::engine::scheduler::run_evaluation_loop;
use crate::engine::scraper::{FeedPoller, Observation, StatusFeed};
use crate::engine::threshold::keep_alive_threshold;
use crate::engine::{Engine, EngineSettings, Transition};
use crate::error::{FeedError, SubmitError};
use crate::models::{Disturbance, Line, MessageType, Report, Source, Status, SubmitterId};
use crate::notify::{DisturbanceNotification, NotificationDispatcher};
use crate::oracle::StaticOracle;
use crate::store::{EntityStore, MemoryStore};

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    oracle: Arc<StaticOracle>,
    engine: Engine,
    notifications: mpsc::Receiver<DisturbanceNotification>,
}

fn blue() -> Line {
    Line::new("blue", "metro", "Blue")
}

fn red() -> Line {
    Line::new("red", "metro", "Red")
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

fn harness_with_queue(capacity: usize, handoff_timeout: StdDuration) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = Arc::new(MemoryStore::with_lines([blue(), red()]));
    let oracle = Arc::new(StaticOracle::new());
    oracle.set_users_on_line("blue", 1);
    oracle.set_users_on_line("red", 1);

    let (dispatcher, notifications) = NotificationDispatcher::channel(capacity, handoff_timeout);
    let engine = Engine::new(
        store.clone(),
        oracle.clone(),
        dispatcher,
        clock.clone(),
        &EngineSettings::default(),
    );

    Harness { clock, store, oracle, engine, notifications }
}

fn harness() -> Harness {
    harness_with_queue(64, StdDuration::from_millis(50))
}

impl Harness {
    async fn report_burst(&self, line: &Line, count: usize, prefix: &str) {
        for i in 0..count {
            let report = Report::anonymous(line.clone(), format!("{prefix}-{i}"), self.clock.now());
            assert_eq!(self.engine.intake.submit(report).await.unwrap(), 1);
        }
    }

    async fn disturbances(&self, line_id: &str) -> Vec<Disturbance> {
        self.store.disturbances_for_line(line_id).await.unwrap()
    }

    async fn open(&self, line_id: &str) -> Option<Disturbance> {
        self.disturbances(line_id).await.into_iter().find(|d| d.is_open())
    }

    fn drain_notifications(&mut self) -> Vec<DisturbanceNotification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    async fn assert_audit_clean(&self, line_id: &str) {
        let report = audit_line(self.store.as_ref(), line_id).await.unwrap();
        assert!(report.is_clean(), "audit failed: {:?}", report.violations);
    }

    fn status(&self, downtime: bool, official: bool, text: &str) -> Status {
        let source = if official { Source::official("operator", "Operator feed") } else { Source::community() };
        Status::new("blue", self.clock.now(), downtime, text, source)
    }
}

// ------------------------------------------------------------------
// Consensus
// ------------------------------------------------------------------

#[tokio::test]
async fn test_fifteenth_vote_starts_disturbance() {
    let mut h = harness();
    h.report_burst(&blue(), 14, "rider").await;

    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::Unchanged);
    assert!(h.disturbances("blue").await.is_empty());

    h.report_burst(&blue(), 1, "late").await;
    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::Started { backdated: false });

    let d = h.open("blue").await.unwrap();
    assert!(!d.official);
    assert_eq!(d.u_start_time, h.clock.now());
    assert_eq!(d.statuses.len(), 1);
    assert_eq!(d.statuses[0].msg_type, MessageType::ReportConfirm);
    assert_eq!(d.statuses[0].text, TEXT_CONFIRM);
    assert!(!d.statuses[0].source.official);

    let sent = h.drain_notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status.msg_type, MessageType::ReportConfirm);
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_old_votes_backdate_start() {
    let mut h = harness();
    let t0 = h.clock.now();
    h.report_burst(&blue(), 1, "early").await;
    h.clock.advance(Duration::minutes(5));
    h.report_burst(&blue(), 14, "rider").await;

    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::Started { backdated: true });

    let d = h.open("blue").await.unwrap();
    assert_eq!(d.u_start_time, t0);
    assert_eq!(d.statuses.len(), 2);
    assert_eq!(d.statuses[0].msg_type, MessageType::ReportBegin);
    assert_eq!(d.statuses[0].time, t0);
    assert_eq!(d.statuses[1].msg_type, MessageType::ReportConfirm);
    assert_eq!(d.statuses[1].time, h.clock.now());

    // The begin status only backdates; users hear about the confirmation
    let sent = h.drain_notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status.msg_type, MessageType::ReportConfirm);
}

#[tokio::test]
async fn test_expiry_below_keep_alive_solves() {
    let mut h = harness();
    let t0 = h.clock.now();
    h.report_burst(&blue(), 9, "first-wave").await;
    h.clock.advance(Duration::minutes(5));
    h.report_burst(&blue(), 6, "second-wave").await;
    h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    h.drain_notifications();

    // 15 votes, keep-alive 7: nothing to do
    h.clock.advance(Duration::minutes(5));
    assert_eq!(h.engine.evaluator.evaluate_line(&blue()).await.unwrap(), LineOutcome::Unchanged);

    h.clock.set(t0 + Duration::minutes(15) + Duration::seconds(1));
    assert_eq!(h.engine.reports.purge_expired(), 9);
    assert_eq!(h.engine.reports.votes_for_line("blue"), 6);

    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::Solved);

    let disturbances = h.disturbances("blue").await;
    assert_eq!(disturbances.len(), 1);
    let d = &disturbances[0];
    assert!(d.u_ended);
    assert_eq!(d.u_end_time, Some(h.clock.now()));
    let latest = d.latest_status().unwrap();
    assert!(!latest.is_downtime);
    assert_eq!(latest.msg_type, MessageType::ReportSolved);

    let sent = h.drain_notifications();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].disturbance.u_ended);
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_keep_alive_threshold_holds_disturbance_open() {
    let h = harness();
    let t0 = h.clock.now();
    h.report_burst(&blue(), 8, "first-wave").await;
    h.clock.advance(Duration::minutes(3));
    h.report_burst(&blue(), 1, "straggler").await;
    h.clock.advance(Duration::minutes(2));
    h.report_burst(&blue(), 6, "second-wave").await;
    assert_eq!(
        h.engine.evaluator.evaluate_line(&blue()).await.unwrap(),
        LineOutcome::Started { backdated: true }
    );

    // Exactly at keep-alive: stays open
    h.clock.set(t0 + Duration::minutes(15) + Duration::seconds(1));
    assert_eq!(h.engine.reports.purge_expired(), 8);
    assert_eq!(h.engine.reports.votes_for_line("blue"), keep_alive_threshold(1));
    assert_eq!(h.engine.evaluator.evaluate_line(&blue()).await.unwrap(), LineOutcome::Unchanged);
    assert!(h.open("blue").await.is_some());

    // One vote below: solved
    h.clock.set(t0 + Duration::minutes(18) + Duration::seconds(1));
    assert_eq!(h.engine.reports.purge_expired(), 1);
    assert_eq!(h.engine.reports.votes_for_line("blue"), keep_alive_threshold(1) - 1);
    assert_eq!(h.engine.evaluator.evaluate_line(&blue()).await.unwrap(), LineOutcome::Solved);
    assert!(h.open("blue").await.is_none());
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_votes_surviving_a_closed_disturbance_reconfirm() {
    let h = harness();
    let t0 = h.clock.now();
    h.report_burst(&blue(), 9, "first-wave").await;
    h.clock.advance(Duration::minutes(5));
    h.report_burst(&blue(), 6, "second-wave").await;
    h.engine.evaluator.evaluate_line(&blue()).await.unwrap();

    h.clock.set(t0 + Duration::minutes(15) + Duration::seconds(1));
    h.engine.reports.purge_expired();
    assert_eq!(h.engine.evaluator.evaluate_line(&blue()).await.unwrap(), LineOutcome::Solved);

    // Second-wave votes predate the close; new votes push the line back over
    h.report_burst(&blue(), 9, "third-wave").await;
    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::Reconfirmed);

    let disturbances = h.disturbances("blue").await;
    assert_eq!(disturbances.len(), 2);
    let reopened = h.open("blue").await.unwrap();
    assert_eq!(reopened.statuses.len(), 1);
    assert_eq!(reopened.statuses[0].text, TEXT_RECONFIRM);
    assert_eq!(reopened.u_start_time, h.clock.now());
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_official_disturbance_discards_votes() {
    let h = harness();
    h.engine
        .machine
        .ingest_status(h.status(true, true, "Circulação interrompida"))
        .await
        .unwrap();

    h.report_burst(&blue(), 20, "rider").await;
    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::VotesCleared);
    assert_eq!(h.engine.reports.votes_for_line("blue"), 0);

    // Official close, then no residual votes to reopen it
    h.engine
        .machine
        .ingest_status(h.status(false, true, "Circulação normal"))
        .await
        .unwrap();
    assert_eq!(h.engine.evaluator.evaluate_line(&blue()).await.unwrap(), LineOutcome::Unchanged);
    assert!(h.open("blue").await.is_none());
}

#[tokio::test]
async fn test_population_raises_threshold() {
    let h = harness();
    h.oracle.set_users_on_line("blue", 2);
    h.report_burst(&blue(), 19, "rider").await;
    assert_eq!(h.engine.evaluator.evaluate_line(&blue()).await.unwrap(), LineOutcome::Unchanged);

    h.report_burst(&blue(), 1, "twentieth").await;
    assert_eq!(
        h.engine.evaluator.evaluate_line(&blue()).await.unwrap(),
        LineOutcome::Started { backdated: false }
    );
}

#[tokio::test]
async fn test_concurrent_evaluations_start_once() {
    let h = harness();
    h.report_burst(&blue(), 15, "rider").await;

    let evaluator = h.engine.evaluator.clone();
    let line = blue();
    let (a, b) = tokio::join!(evaluator.evaluate_line(&line), evaluator.evaluate_line(&line));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, LineOutcome::Unchanged));

    assert_eq!(outcomes, vec![LineOutcome::Started { backdated: false }, LineOutcome::Unchanged]);
    assert_eq!(h.disturbances("blue").await.len(), 1);
}

#[tokio::test]
async fn test_failing_line_does_not_stop_the_pass() {
    let h = harness();
    h.report_burst(&blue(), 15, "blue-rider").await;
    h.report_burst(&red(), 15, "red-rider").await;

    // Lines are evaluated in id order; blue's commit fails
    h.store.fail_next_commits(1);
    let summary = h.engine.evaluator.evaluate_all().await.unwrap();
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.started, 1);
    assert_eq!(summary.failed, vec!["blue".to_string()]);
    assert!(h.disturbances("blue").await.is_empty());
    assert!(h.open("red").await.is_some());

    let summary = h.engine.evaluator.evaluate_all().await.unwrap();
    assert_eq!(summary.started, 1);
    assert!(summary.failed.is_empty());
    assert!(h.open("blue").await.is_some());
}

// ------------------------------------------------------------------
// Report intake
// ------------------------------------------------------------------

#[tokio::test]
async fn test_intake_rejections() {
    let h = harness();
    let now = h.clock.now();

    let first = Report::anonymous(blue(), "198.51.100.1", now);
    assert_eq!(h.engine.intake.submit(first.clone()).await.unwrap(), 1);
    assert!(matches!(h.engine.intake.submit(first).await, Err(SubmitError::RateLimited(_))));

    let mut closed = red();
    closed.closed = true;
    h.store.save_line(&closed).await.unwrap();
    // Caller's copy says open; the store says closed
    let report = Report::anonymous(red(), "198.51.100.2", now);
    assert!(matches!(h.engine.intake.submit(report).await, Err(SubmitError::LineClosed(id)) if id == "red"));

    let ghost = Line::new("ghost", "metro", "Ghost");
    let report = Report::anonymous(ghost, "198.51.100.3", now);
    assert!(matches!(h.engine.intake.submit(report).await, Err(SubmitError::UnknownLine(_))));

    assert_eq!(h.engine.reports.votes_for_line("blue"), 1);
    assert_eq!(h.engine.reports.votes_for_line("red"), 0);
}

#[tokio::test]
async fn test_report_time_is_arrival_time() {
    let h = harness();
    let now = h.clock.now();

    let stale = Report::anonymous(blue(), "skewed-clock", now - Duration::days(2));
    h.engine.intake.submit(stale).await.unwrap();
    let ahead = Report::anonymous(blue(), "fast-clock", now + Duration::hours(1));
    h.engine.intake.submit(ahead).await.unwrap();
    assert_eq!(h.engine.reports.earliest_for_line("blue").map(|r| r.time), Some(now));

    h.report_burst(&blue(), 13, "rider").await;
    let outcome = h.engine.evaluator.evaluate_line(&blue()).await.unwrap();
    assert_eq!(outcome, LineOutcome::Started { backdated: false });

    let d = h.open("blue").await.unwrap();
    assert_eq!(d.u_start_time, now);
    assert_eq!(d.statuses.len(), 1);
}

#[tokio::test]
async fn test_oracle_failure_rejects_report() {
    let h = harness();
    h.oracle.set_unavailable(true);

    let who = SubmitterId(Uuid::new_v4());
    let report = Report::through_api(blue(), who, h.clock.now());
    assert!(matches!(h.engine.intake.submit(report.clone()).await, Err(SubmitError::Oracle(_))));
    assert!(h.engine.reports.is_empty());

    // Not admitted, so not rate limited either
    h.oracle.set_unavailable(false);
    h.oracle.set_riding(who, &blue());
    assert_eq!(h.engine.intake.submit(report).await.unwrap(), 30);
    assert_eq!(h.engine.reports.votes_for_line("blue"), 30);
}

// ------------------------------------------------------------------
// State machine
// ------------------------------------------------------------------

#[tokio::test]
async fn test_identical_status_is_ingested_once() {
    let mut h = harness();
    let status = h.status(true, true, "Circulação interrompida");

    assert_eq!(
        h.engine.machine.ingest_status(status.clone()).await.unwrap(),
        Transition::Open { official: true }
    );
    assert_eq!(h.engine.machine.ingest_status(status).await.unwrap(), Transition::Discard);

    assert_eq!(h.store.statuses_for_line("blue").await.unwrap().len(), 1);
    assert_eq!(h.drain_notifications().len(), 1);
}

#[tokio::test]
async fn test_official_all_clear_keeps_crowd_disturbance_open() {
    let h = harness();
    h.engine.machine.ingest_status(h.status(true, false, "Users report problems")).await.unwrap();

    h.clock.advance(Duration::minutes(3));
    let transition = h
        .engine
        .machine
        .ingest_status(h.status(false, true, "Circulação normal"))
        .await
        .unwrap();
    assert_eq!(transition, Transition::Recover { close_unofficial: false, close_official: false });

    let d = h.open("blue").await.unwrap();
    assert!(!d.u_ended);
    assert!(!d.official);
    assert_eq!(d.statuses.len(), 2);
    assert_eq!(d.latest_status().unwrap().msg_type, MessageType::RegularService);
    assert_eq!(h.store.statuses_for_line("blue").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_official_downtime_officializes_crowd_disturbance() {
    let h = harness();
    let t0 = h.clock.now();
    h.engine.machine.ingest_status(h.status(true, false, "Users report problems")).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    let transition = h
        .engine
        .machine
        .ingest_status(h.status(true, true, "Circulação interrompida por avaria num comboio"))
        .await
        .unwrap();
    assert_eq!(transition, Transition::Escalate { officialize: true });

    let d = h.open("blue").await.unwrap();
    assert!(d.official);
    assert_eq!(d.u_start_time, t0);
    assert_eq!(d.o_start_time, Some(t0 + Duration::minutes(10)));
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_crowd_all_clear_does_not_shorten_official_disturbance() {
    let mut h = harness();
    h.engine.machine.ingest_status(h.status(true, true, "Circulação interrompida")).await.unwrap();

    h.clock.advance(Duration::minutes(4));
    let transition = h
        .engine
        .machine
        .ingest_status(h.status(false, false, "Users no longer report problems"))
        .await
        .unwrap();
    assert_eq!(transition, Transition::Recover { close_unofficial: false, close_official: false });

    let d = h.open("blue").await.unwrap();
    assert!(!d.u_ended && !d.o_ended);
    assert_eq!(d.statuses.len(), 2);
    // Recoveries are always notified
    assert_eq!(h.drain_notifications().len(), 2);
}

#[tokio::test]
async fn test_official_recovery_closes_both_timelines() {
    let h = harness();
    let t0 = h.clock.now();
    h.engine.machine.ingest_status(h.status(true, false, "Users report problems")).await.unwrap();
    h.clock.advance(Duration::minutes(2));
    h.engine.machine.ingest_status(h.status(true, true, "Circulação interrompida")).await.unwrap();
    h.clock.advance(Duration::minutes(20));
    h.engine.machine.ingest_status(h.status(false, true, "Circulação normal")).await.unwrap();

    let disturbances = h.disturbances("blue").await;
    assert_eq!(disturbances.len(), 1);
    let d = &disturbances[0];
    assert!(d.u_ended && d.o_ended);
    assert_eq!(d.u_start_time, t0);
    assert_eq!(d.o_start_time, Some(t0 + Duration::minutes(2)));
    assert_eq!(d.u_end_time, Some(t0 + Duration::minutes(22)));
    assert_eq!(d.o_end_time, d.u_end_time);
    h.assert_audit_clean("blue").await;

    // Next downtime opens a fresh disturbance
    h.clock.advance(Duration::minutes(30));
    h.engine.machine.ingest_status(h.status(true, true, "Circulação interrompida")).await.unwrap();
    assert_eq!(h.disturbances("blue").await.len(), 2);
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_recovery_on_idle_line_is_recorded_only() {
    let mut h = harness();
    let transition = h
        .engine
        .machine
        .ingest_status(h.status(false, true, "Circulação normal"))
        .await
        .unwrap();
    assert_eq!(transition, Transition::RecordOnly);
    assert!(h.disturbances("blue").await.is_empty());
    assert_eq!(h.store.latest_status_for_line("blue").await.unwrap().unwrap().text, "Circulação normal");
    assert!(h.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_concurrent_downtime_opens_one_disturbance() {
    let h = harness();
    let machine = h.engine.machine.clone();
    let a = h.status(true, true, "Circulação interrompida");
    let b = h.status(true, false, "Users report problems");

    let (ra, rb) = tokio::join!(machine.ingest_status(a), machine.ingest_status(b));
    ra.unwrap();
    rb.unwrap();

    let disturbances = h.disturbances("blue").await;
    assert_eq!(disturbances.len(), 1);
    assert_eq!(disturbances[0].statuses.len(), 2);
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_commit_failure_leaves_no_trace() {
    let mut h = harness();
    h.store.fail_next_commits(1);

    let result = h.engine.machine.ingest_status(h.status(true, true, "Circulação interrompida")).await;
    assert!(result.is_err());
    assert!(h.disturbances("blue").await.is_empty());
    assert!(h.store.statuses_for_line("blue").await.unwrap().is_empty());
    assert!(h.drain_notifications().is_empty());

    h.engine.machine.ingest_status(h.status(true, true, "Circulação interrompida")).await.unwrap();
    assert!(h.open("blue").await.is_some());
}

#[tokio::test]
async fn test_stuck_notification_consumer_does_not_block_or_roll_back() {
    let h = harness_with_queue(1, StdDuration::from_millis(50));

    // Queue holds one; the rest time out after 50ms each and are dropped
    for line in ["blue", "red"] {
        for text in ["Circulação interrompida", "Circulação com perturbações"] {
            let status = Status::new(line, h.clock.now(), true, text, Source::official("operator", "Operator feed"));
            h.engine.machine.ingest_status(status).await.unwrap();
        }
    }

    for line in ["blue", "red"] {
        let d = h.open(line).await.unwrap();
        assert_eq!(d.statuses.len(), 2);
    }
}

#[tokio::test]
async fn test_line_lock_released_before_notification_handoff() {
    let mut h = harness_with_queue(1, StdDuration::from_secs(5));
    h.engine.machine.ingest_status(h.status(true, true, "Circulação interrompida")).await.unwrap();

    // Queue is full: this ingest commits, then waits on the hand-off
    let machine = h.engine.machine.clone();
    let slowed = h.status(true, true, "Circulação com perturbações");
    let handle = tokio::spawn(async move { machine.ingest_status(slowed).await });

    let mut committed = false;
    for _ in 0..100 {
        if h.store.statuses_for_line("blue").await.unwrap().len() == 2 {
            committed = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(committed);

    let relock = tokio::time::timeout(StdDuration::from_millis(500), h.store.begin_line("blue")).await;
    assert!(relock.is_ok(), "line lock still held during notification hand-off");
    drop(relock);

    assert!(h.notifications.recv().await.is_some());
    let transition = handle.await.unwrap().unwrap();
    assert_eq!(transition, Transition::Escalate { officialize: false });
    assert_eq!(h.drain_notifications().len(), 1);
}

// ------------------------------------------------------------------
// Loops
// ------------------------------------------------------------------

#[tokio::test]
async fn test_report_change_triggers_evaluation() {
    let h = harness();
    let changes = h.engine.reports.on_change();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_evaluation_loop(
        h.engine.evaluator.clone(),
        changes,
        StdDuration::from_secs(3600),
        shutdown_rx,
    ));

    h.report_burst(&blue(), 15, "rider").await;

    let mut opened = false;
    for _ in 0..100 {
        if h.open("blue").await.is_some() {
            opened = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(opened, "change events should have started a disturbance");

    shutdown_tx.send(true).unwrap();
    tokio_test::assert_ok!(handle.await);
    assert_eq!(h.disturbances("blue").await.len(), 1);
}

struct ScriptedFeed {
    observations: Mutex<Vec<Observation>>,
    outages: AtomicUsize,
}

impl ScriptedFeed {
    fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations: Mutex::new(observations),
            outages: AtomicUsize::new(0),
        }
    }
}

fn observe(downtime: bool, text: &str, at: DateTime<Utc>) -> Observation {
    Observation {
        line_id: "blue".to_string(),
        is_downtime: downtime,
        text: text.to_string(),
        time: at,
    }
}

#[async_trait]
impl StatusFeed for ScriptedFeed {
    fn source(&self) -> Source {
        Source::official("operator", "Operator feed")
    }

    async fn fetch(&self) -> Result<Vec<Observation>, FeedError> {
        if self.outages.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(FeedError::Unreachable("operator site timed out".to_string()));
        }
        Ok(self.observations.lock().clone())
    }
}

#[tokio::test]
async fn test_feed_poller_skips_unchanged_content() {
    let h = harness();
    let feed = Arc::new(ScriptedFeed::new(vec![observe(true, "Circulação interrompida", h.clock.now())]));
    let mut poller = FeedPoller::new(feed.clone(), h.engine.machine.clone());

    assert_eq!(poller.poll_once().await.unwrap(), 1);
    h.clock.advance(Duration::minutes(1));
    *feed.observations.lock() = vec![observe(true, "Circulação interrompida", h.clock.now())];
    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert_eq!(h.store.statuses_for_line("blue").await.unwrap().len(), 1);

    let d = h.open("blue").await.unwrap();
    assert!(d.official);

    h.clock.advance(Duration::minutes(10));
    *feed.observations.lock() = vec![observe(false, "Circulação normal", h.clock.now())];
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert!(h.open("blue").await.is_none());
    h.assert_audit_clean("blue").await;
}

#[tokio::test]
async fn test_feed_poller_loop_survives_outages() {
    let h = harness();
    let feed = Arc::new(ScriptedFeed::new(vec![observe(true, "Circulação interrompida", h.clock.now())]));
    feed.outages.store(2, Ordering::SeqCst);

    let mut poller = FeedPoller::new(feed.clone(), h.engine.machine.clone());
    assert!(matches!(poller.poll_once().await, Err(FeedError::Unreachable(_))));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(StdDuration::from_millis(10), shutdown_rx));

    let mut opened = false;
    for _ in 0..100 {
        if h.open("blue").await.is_some() {
            opened = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(opened, "poller should recover once the feed is reachable");
    assert_eq!(feed.outages.load(Ordering::SeqCst), 0);

    shutdown_tx.send(true).unwrap();
    tokio_test::assert_ok!(handle.await);
    assert_eq!(h.store.statuses_for_line("blue").await.unwrap().len(), 1);
}
