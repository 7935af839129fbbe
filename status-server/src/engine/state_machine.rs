//! Disturbance State Machine
//!
//! Single intake for every status observation, scraped or synthesized.
//! Each call runs inside one line transaction: read the open disturbance,
//! pick a [`Transition`], write, commit, and only then hand notifications
//! to the dispatcher.
//!
//! ```text
//!   has open | open official | downtime | incoming official | transition
//!   ---------+---------------+----------+-------------------+-------------------------------
//!   yes      | any           | same content as latest       | Discard
//!   no       | -             | true     | any               | Open
//!   no       | -             | false    | any               | RecordOnly
//!   yes      | no            | true     | yes               | Escalate (officialize)
//!   yes      | any           | true     | otherwise         | Escalate
//!   yes      | no            | false    | yes               | Recover (no timeline change)
//!   yes      | yes           | false    | no                | Recover (no timeline change)
//!   yes      | yes           | false    | yes               | Recover (close both)
//!   yes      | no            | false    | no                | Recover (close unofficial)
//! ```

use std::sync::Arc;

use serde::Serialize;

use super::classifier;
use crate::error::EngineResult;
use crate::models::{Disturbance, MessageType, Status};
use crate::notify::{DisturbanceNotification, NotificationDispatcher};
use crate::store::{EntityStore, LineTx};

/// What an incoming status does to the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transition {
    /// Identical to the open disturbance's latest status
    Discard,
    /// Start a new disturbance
    Open { official: bool },
    /// Keep the status as history only
    RecordOnly,
    /// Downtime on an open disturbance
    Escalate { officialize: bool },
    /// Recovery signal on an open disturbance
    Recover { close_unofficial: bool, close_official: bool },
}

/// Decide the transition for `status` given the line's open disturbance
pub fn plan(open: Option<&Disturbance>, status: &Status) -> Transition {
    let Some(open) = open else {
        return if status.is_downtime {
            Transition::Open { official: status.source.official }
        } else {
            Transition::RecordOnly
        };
    };

    if open.latest_status().is_some_and(|latest| latest.same_content(status)) {
        return Transition::Discard;
    }

    match (status.is_downtime, open.official, status.source.official) {
        (true, false, true) => Transition::Escalate { officialize: true },
        (true, _, _) => Transition::Escalate { officialize: false },
        // An official all-clear does not close a crowd-only disturbance
        (false, false, true) => Transition::Recover { close_unofficial: false, close_official: false },
        // A crowd all-clear does not shorten an official disturbance
        (false, true, false) => Transition::Recover { close_unofficial: false, close_official: false },
        (false, true, true) => Transition::Recover { close_unofficial: true, close_official: true },
        (false, false, false) => Transition::Recover { close_unofficial: true, close_official: false },
    }
}

/// A line transaction plus the state read inside it
pub struct LineSession {
    tx: Box<dyn LineTx>,
    line_id: String,
    open: Option<Disturbance>,
    last_closed: Option<Option<Disturbance>>,
    notifications: Vec<DisturbanceNotification>,
}

impl LineSession {
    pub fn line_id(&self) -> &str {
        &self.line_id
    }

    pub fn open_disturbance(&self) -> Option<&Disturbance> {
        self.open.as_ref()
    }

    /// Most recently closed disturbance, read once per session
    pub async fn last_closed(&mut self) -> EngineResult<Option<&Disturbance>> {
        if self.last_closed.is_none() {
            let closed = self.tx.last_closed_disturbance().await?;
            self.last_closed = Some(closed);
        }
        Ok(self.last_closed.as_ref().and_then(|d| d.as_ref()))
    }
}

pub struct DisturbanceMachine {
    store: Arc<dyn EntityStore>,
    dispatcher: NotificationDispatcher,
}

impl DisturbanceMachine {
    pub fn new(store: Arc<dyn EntityStore>, dispatcher: NotificationDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Lock the line and read its open disturbance
    pub async fn begin(&self, line_id: &str) -> EngineResult<LineSession> {
        let mut tx = self.store.begin_line(line_id).await?;
        let open = tx.open_disturbance().await?;
        Ok(LineSession {
            tx,
            line_id: line_id.to_string(),
            open,
            last_closed: None,
            notifications: Vec::new(),
        })
    }

    /// Ingest one observation in its own transaction
    pub async fn ingest_status(&self, status: Status) -> EngineResult<Transition> {
        let mut session = self.begin(&status.line_id).await?;
        let transition = self.apply(&mut session, status, true).await?;
        self.finish(session).await?;
        Ok(transition)
    }

    /// Apply `status` within `session`. Notifications are queued on the
    /// session and only sent by [`finish`](Self::finish).
    pub async fn apply(&self, session: &mut LineSession, mut status: Status, notify: bool) -> EngineResult<Transition> {
        if status.msg_type == MessageType::Raw {
            status.msg_type = classifier::classify(&status.text);
        }

        let transition = plan(session.open.as_ref(), &status);
        match transition {
            Transition::Discard => {
                tracing::debug!("Discarding duplicate status for line {}: {}", status.line_id, status.text);
                return Ok(transition);
            }
            Transition::RecordOnly => {
                session.tx.insert_status(&status, None).await?;
                tracing::debug!("Recorded status for idle line {}: {}", status.line_id, status.text);
                return Ok(transition);
            }
            Transition::Open { official } => {
                let mut disturbance = Disturbance::open(&status);
                session.tx.save_disturbance(&disturbance).await?;
                session.tx.insert_status(&status, Some(disturbance.id)).await?;
                disturbance.statuses.push(status.clone());
                tracing::info!(
                    "Disturbance {} opened on line {} (official: {}): {}",
                    disturbance.id, status.line_id, official, status.text
                );
                session.open = Some(disturbance);
            }
            Transition::Escalate { officialize } => {
                let Some(disturbance) = session.open.as_mut() else {
                    return Ok(transition);
                };
                if officialize {
                    disturbance.officialize(status.time);
                    session.tx.save_disturbance(disturbance).await?;
                    tracing::info!("Disturbance {} on line {} confirmed officially", disturbance.id, status.line_id);
                }
                session.tx.insert_status(&status, Some(disturbance.id)).await?;
                disturbance.statuses.push(status.clone());
            }
            Transition::Recover { close_unofficial, close_official } => {
                let Some(disturbance) = session.open.as_mut() else {
                    return Ok(transition);
                };
                if close_unofficial {
                    disturbance.close_unofficial(status.time);
                }
                if close_official {
                    disturbance.close_official(status.time);
                }
                if close_unofficial || close_official {
                    session.tx.save_disturbance(disturbance).await?;
                    tracing::info!(
                        "Disturbance {} on line {} ended (official timeline closed: {})",
                        disturbance.id, status.line_id, close_official
                    );
                } else {
                    tracing::debug!(
                        "Recovery status on line {} does not change disturbance {} timelines",
                        status.line_id, disturbance.id
                    );
                }
                session.tx.insert_status(&status, Some(disturbance.id)).await?;
                disturbance.statuses.push(status.clone());
            }
        }

        if notify {
            if let Some(disturbance) = session.open.as_ref() {
                session.notifications.push(DisturbanceNotification {
                    disturbance: disturbance.clone(),
                    status,
                });
            }
        }

        // A closed disturbance is history from here on
        if session.open.as_ref().is_some_and(|d| !d.is_open()) {
            session.last_closed = Some(session.open.take());
        }

        Ok(transition)
    }

    /// Commit the session, release the line, then hand off its notifications
    pub async fn finish(&self, session: LineSession) -> EngineResult<()> {
        let LineSession { mut tx, line_id, notifications, .. } = session;
        if let Err(e) = tx.commit().await {
            tracing::error!("Failed to commit changes for line {}: {}", line_id, e);
            return Err(e.into());
        }
        // Slow consumers must not hold the line lock
        drop(tx);

        for notification in notifications {
            self.dispatcher.dispatch(notification).await;
        }
        Ok(())
    }
}
