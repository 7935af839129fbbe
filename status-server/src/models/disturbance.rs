//! Disturbance model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Status;

/// A bounded interval of degraded service on one line.
///
/// The unofficial timeline (`u_*`) follows every status; the official one
/// (`o_*`) only follows statuses from official sources and always lies
/// inside the unofficial interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Disturbance {
    pub id: Uuid,
    pub line_id: String,
    pub u_start_time: DateTime<Utc>,
    pub u_end_time: Option<DateTime<Utc>>,
    pub u_ended: bool,
    pub official: bool,
    pub o_start_time: Option<DateTime<Utc>>,
    pub o_end_time: Option<DateTime<Utc>>,
    pub o_ended: bool,
    #[sqlx(skip)]
    pub statuses: Vec<Status>,
}

/// Per-line lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineState {
    Idle,
    UnofficialOpen,
    OfficialOpen,
}

impl Disturbance {
    /// Open a disturbance starting at `status`
    pub fn open(status: &Status) -> Self {
        let official = status.source.official;
        Self {
            id: Uuid::new_v4(),
            line_id: status.line_id.clone(),
            u_start_time: status.time,
            u_end_time: None,
            u_ended: false,
            official,
            o_start_time: official.then_some(status.time),
            o_end_time: None,
            o_ended: false,
            statuses: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.u_ended
    }

    pub fn latest_status(&self) -> Option<&Status> {
        self.statuses.last()
    }

    pub fn state(&self) -> LineState {
        match (self.u_ended, self.official) {
            (true, _) => LineState::Idle,
            (false, true) => LineState::OfficialOpen,
            (false, false) => LineState::UnofficialOpen,
        }
    }

    /// Mark official from `at`, never before the unofficial start
    pub fn officialize(&mut self, at: DateTime<Utc>) {
        self.official = true;
        self.o_start_time = Some(at.max(self.u_start_time));
    }

    pub fn close_unofficial(&mut self, at: DateTime<Utc>) {
        self.u_end_time = Some(at.max(self.u_start_time));
        self.u_ended = true;
    }

    pub fn close_official(&mut self, at: DateTime<Utc>) {
        let floor = self.o_start_time.unwrap_or(self.u_start_time);
        let end = at.max(floor);
        self.o_end_time = Some(match self.u_end_time {
            Some(u_end) => end.min(u_end),
            None => end,
        });
        self.o_ended = true;
    }

    /// Timeline invariant violations, empty when the record is consistent
    pub fn violations(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Some(u_end) = self.u_end_time {
            if u_end < self.u_start_time {
                problems.push(format!("unofficial end {u_end} precedes start {}", self.u_start_time));
            }
        }
        if self.u_ended != self.u_end_time.is_some() {
            problems.push("unofficial ended flag disagrees with end time".to_string());
        }

        if self.official {
            match self.o_start_time {
                Some(o_start) if o_start < self.u_start_time => {
                    problems.push(format!("official start {o_start} precedes unofficial start {}", self.u_start_time));
                }
                None => problems.push("official disturbance without official start".to_string()),
                _ => {}
            }
            if let (Some(o_end), Some(u_end)) = (self.o_end_time, self.u_end_time) {
                if o_end > u_end {
                    problems.push(format!("official end {o_end} after unofficial end {u_end}"));
                }
            }
            if self.o_ended && !self.u_ended {
                problems.push("official timeline ended while unofficial is open".to_string());
            }
        } else if self.o_start_time.is_some() || self.o_ended {
            problems.push("unofficial disturbance carries official timeline".to_string());
        }

        problems
    }
}
