//! Crowd-sourced disturbance report model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use super::Line;

/// Authenticated submitter identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmitterId(pub Uuid);

impl fmt::Display for SubmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Deterministic key of (line, submitter) used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimiterKey(String);

impl RateLimiterKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A claim that a line is disturbed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub line: Line,
    pub time: DateTime<Utc>,
    /// True when the submission channel makes forgery/duplication hard
    pub replay_protected: bool,
    pub submitter: Option<SubmitterId>,
    /// Client fingerprint for submissions without an authenticated identity
    pub origin: String,
}

impl Report {
    /// Legacy/anonymous submission
    pub fn anonymous(line: Line, origin: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            line,
            time,
            replay_protected: false,
            submitter: None,
            origin: origin.into(),
        }
    }

    /// Submission through the signed app API
    pub fn through_api(line: Line, submitter: SubmitterId, time: DateTime<Utc>) -> Self {
        Self {
            line,
            time,
            replay_protected: true,
            submitter: Some(submitter),
            origin: submitter.to_string(),
        }
    }

    pub fn rate_limiter_key(&self) -> RateLimiterKey {
        let identity = match &self.submitter {
            Some(s) => format!("submitter:{s}"),
            None => format!("origin:{}", self.origin),
        };

        let mut hasher = Sha256::new();
        hasher.update(self.line.id.as_bytes());
        hasher.update(b"\0");
        hasher.update(identity.as_bytes());
        RateLimiterKey(hex::encode(hasher.finalize()))
    }
}
