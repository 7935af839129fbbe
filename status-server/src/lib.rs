//! Transit Status Server
//!
//! Tracks service disruptions per transit line by fusing the operator's
//! official status feed with crowd-sourced reports from app users.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TRANSIT STATUS SERVER                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  Report   │  │  Feed     │  │  Consensus Evaluator    │ │
//! │  │  Intake   │  │  Pollers  │  │  (Background Loop)      │ │
//! │  └─────┬─────┘  └─────┬─────┘  └────────────┬────────────┘ │
//! │        └──────────────┼──────────────────────┘              │
//! │                       ▼                                     │
//! │              ┌──────────────────┐                          │
//! │              │ Disturbance      │──► Notifications         │
//! │              │ State Machine    │                          │
//! │              └────────┬─────────┘                          │
//! │                       ▼                                     │
//! │                ┌─────────────┐                             │
//! │                │ PostgreSQL  │                             │
//! │                └─────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod notify;
pub mod oracle;
pub mod store;

pub use engine::{Engine, EngineSettings};
pub use error::{EngineError, EngineResult};
