//! Official status feed polling
//!
//! Parsing the operator's pages is the feed's business; this loop only
//! turns fresh observations into official statuses. Unchanged raw content
//! per line is skipped before a status is even built.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use super::classifier;
use super::state_machine::{DisturbanceMachine, Transition};
use crate::error::FeedError;
use crate::models::{Source, Status};

/// One line's condition as published by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub line_id: String,
    pub is_downtime: bool,
    pub text: String,
    pub time: DateTime<Utc>,
}

#[async_trait]
pub trait StatusFeed: Send + Sync {
    /// Source recorded on statuses from this feed
    fn source(&self) -> Source;

    async fn fetch(&self) -> Result<Vec<Observation>, FeedError>;
}

pub struct FeedPoller {
    feed: Arc<dyn StatusFeed>,
    machine: Arc<DisturbanceMachine>,
    last_seen: HashMap<String, [u8; 32]>,
}

impl FeedPoller {
    pub fn new(feed: Arc<dyn StatusFeed>, machine: Arc<DisturbanceMachine>) -> Self {
        Self {
            feed,
            machine,
            last_seen: HashMap::new(),
        }
    }

    fn digest(observation: &Observation) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([observation.is_downtime as u8]);
        hasher.update(observation.text.as_bytes());
        hasher.finalize().into()
    }

    /// Fetch once and ingest changed observations; returns how many were ingested
    pub async fn poll_once(&mut self) -> Result<usize, FeedError> {
        let observations = self.feed.fetch().await?;
        let source = self.feed.source();
        let mut ingested = 0;

        for observation in observations {
            let digest = Self::digest(&observation);
            if self.last_seen.get(&observation.line_id) == Some(&digest) {
                continue;
            }

            let status = Status::new(
                observation.line_id.clone(),
                observation.time,
                observation.is_downtime,
                observation.text.clone(),
                source.clone(),
            )
            .with_type(classifier::classify(&observation.text));

            match self.machine.ingest_status(status).await {
                Ok(transition) => {
                    // Only remember content that made it into the store
                    self.last_seen.insert(observation.line_id.clone(), digest);
                    if transition != Transition::Discard {
                        ingested += 1;
                    }
                    tracing::debug!("Feed {} line {}: {:?}", source.id, observation.line_id, transition);
                }
                Err(e) => {
                    tracing::warn!("Failed to ingest {} status for line {}: {}", source.id, observation.line_id, e);
                }
            }
        }

        Ok(ingested)
    }

    /// Poll every `every` until shutdown. An in-flight poll finishes before the loop exits.
    pub async fn run(mut self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let source_id = self.feed.source().id;
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("Feed poller {} started (every {:?})", source_id, every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!("Feed {} poll failed: {}", source_id, e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Feed poller {} stopped", source_id);
    }
}
