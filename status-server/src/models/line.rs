//! Line model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A service line within a transit network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Line {
    pub id: String,
    pub network_id: String,
    pub name: String,
    /// Administratively closed lines do not accept reports
    pub closed: bool,
}

impl Line {
    pub fn new(id: impl Into<String>, network_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_id: network_id.into(),
            name: name.into(),
            closed: false,
        }
    }
}
