//! Transactional entity store
//!
//! Every per-line mutation runs inside a [`LineTx`]: a transaction that holds
//! the line's lock from `begin_line` until it is committed or dropped.
//! Dropping a transaction without committing discards its writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Disturbance, Line, Status};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Open a transaction serialized against every other transaction on `line_id`
    async fn begin_line(&self, line_id: &str) -> Result<Box<dyn LineTx>, StoreError>;

    async fn lines(&self) -> Result<Vec<Line>, StoreError>;

    async fn line(&self, id: &str) -> Result<Option<Line>, StoreError>;

    async fn save_line(&self, line: &Line) -> Result<(), StoreError>;

    /// All disturbances of a line, oldest first, with their statuses
    async fn disturbances_for_line(&self, line_id: &str) -> Result<Vec<Disturbance>, StoreError>;

    /// All statuses of a line (attached or raw), oldest first
    async fn statuses_for_line(&self, line_id: &str) -> Result<Vec<Status>, StoreError>;

    async fn latest_status_for_line(&self, line_id: &str) -> Result<Option<Status>, StoreError>;
}

#[async_trait]
pub trait LineTx: Send {
    /// The line's open disturbance (unofficial timeline not ended), with statuses
    async fn open_disturbance(&mut self) -> Result<Option<Disturbance>, StoreError>;

    /// The most recently closed disturbance of the line, without statuses
    async fn last_closed_disturbance(&mut self) -> Result<Option<Disturbance>, StoreError>;

    /// Insert or update the disturbance header (timelines, official flag)
    async fn save_disturbance(&mut self, disturbance: &Disturbance) -> Result<(), StoreError>;

    /// Persist a status, attaching it to `disturbance_id` when given
    async fn insert_status(&mut self, status: &Status, disturbance_id: Option<Uuid>) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
