//! Disturbance notifications
//!
//! The state machine hands `(Disturbance, Status)` pairs to a bounded queue
//! after its transaction commits. A delivery loop drains the queue into a
//! [`NotificationSink`] (push gateway, webhook, log).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::error::NotifyError;
use crate::models::{Disturbance, Status};

/// One user-visible change on a line
#[derive(Debug, Clone, Serialize)]
pub struct DisturbanceNotification {
    pub disturbance: Disturbance,
    pub status: Status,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &DisturbanceNotification) -> Result<(), NotifyError>;
}

/// Sink that writes notifications to the log as JSON
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &DisturbanceNotification) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "line": notification.status.line_id,
            "disturbance": notification.disturbance.id,
            "official": notification.disturbance.official,
            "ended": notification.disturbance.u_ended,
            "downtime": notification.status.is_downtime,
            "text": notification.status.text,
            "type": notification.status.msg_type.to_string(),
            "time": notification.status.time,
        });
        tracing::info!(target: "notifications", "{}", payload);
        Ok(())
    }
}

/// Producer side of the notification queue
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<DisturbanceNotification>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn channel(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<DisturbanceNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }

    /// Hand a notification to the queue, waiting at most the configured timeout
    pub async fn try_dispatch(&self, notification: DisturbanceNotification) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.timeout, self.tx.send(notification)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(NotifyError::QueueClosed),
            Err(_) => Err(NotifyError::Timeout(self.timeout.as_millis())),
        }
    }

    /// Best-effort hand-off; failures are logged and swallowed
    pub async fn dispatch(&self, notification: DisturbanceNotification) {
        let line_id = notification.status.line_id.clone();
        let disturbance_id = notification.disturbance.id;
        if let Err(e) = self.try_dispatch(notification).await {
            tracing::warn!(
                "Dropped notification for line {} (disturbance {}): {}",
                line_id, disturbance_id, e
            );
        }
    }
}

/// Drain the queue into `sink` until shutdown or until every dispatcher is gone
pub async fn run_delivery_loop(
    mut rx: mpsc::Receiver<DisturbanceNotification>,
    sink: Arc<dyn NotificationSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Notification delivery loop started");

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(notification) = next else { break };
                if let Err(e) = sink.deliver(&notification).await {
                    tracing::warn!("Notification delivery failed for line {}: {}", notification.status.line_id, e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Deliver what was already handed off
    rx.close();
    while let Some(notification) = rx.recv().await {
        if let Err(e) = sink.deliver(&notification).await {
            tracing::warn!("Notification delivery failed for line {}: {}", notification.status.line_id, e);
        }
    }

    tracing::info!("Notification delivery loop stopped");
}
