//! Status model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MessageType, Source};

/// An immutable observation of a line's condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub line_id: String,
    pub is_downtime: bool,
    pub text: String,
    pub source: Source,
    pub msg_type: MessageType,
}

impl Status {
    pub fn new(
        line_id: impl Into<String>,
        time: DateTime<Utc>,
        is_downtime: bool,
        text: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            time,
            line_id: line_id.into(),
            is_downtime,
            text: text.into(),
            source,
            msg_type: MessageType::Raw,
        }
    }

    pub fn with_type(mut self, msg_type: MessageType) -> Self {
        self.msg_type = msg_type;
        self
    }

    /// Same downtime flag, text and official-ness
    pub fn same_content(&self, other: &Status) -> bool {
        self.is_downtime == other.is_downtime
            && self.text == other.text
            && self.source.official == other.source.official
    }
}
