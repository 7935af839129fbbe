//! Status source model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const COMMUNITY_SOURCE_ID: &str = "community-consensus";

/// Where a status observation came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: String,
    pub name: String,
    /// Operator feeds are official; crowd consensus is not
    pub official: bool,
}

impl Source {
    pub fn official(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            official: true,
        }
    }

    /// Source used for statuses synthesized from user reports
    pub fn community() -> Self {
        Self {
            id: COMMUNITY_SOURCE_ID.to_string(),
            name: "Community reports".to_string(),
            official: false,
        }
    }
}
