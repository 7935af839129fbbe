//! In-process entity store
//!
//! Per-line `tokio` mutexes serialize transactions; staged writes are applied
//! to a copy of the tables and swapped in on commit, so a failed commit
//! leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::{EntityStore, LineTx};
use crate::error::StoreError;
use crate::models::{Disturbance, Line, Status};

#[derive(Debug, Default, Clone)]
struct Tables {
    lines: BTreeMap<String, Line>,
    disturbances: Vec<Disturbance>,
    statuses: Vec<Status>,
}

#[derive(Debug, Clone)]
enum Staged {
    Disturbance(Disturbance),
    Status {
        status: Status,
        disturbance_id: Option<Uuid>,
    },
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    line_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(lines: impl IntoIterator<Item = Line>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for line in lines {
                tables.lines.insert(line.id.clone(), line);
            }
        }
        store
    }

    /// Make the next `count` commits fail with `StoreError::Unavailable`
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    fn line_lock(&self, line_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.line_locks
            .lock()
            .entry(line_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin_line(&self, line_id: &str) -> Result<Box<dyn LineTx>, StoreError> {
        let guard = self.line_lock(line_id).lock_owned().await;
        Ok(Box::new(MemoryLineTx {
            tables: self.tables.clone(),
            failing_commits: self.failing_commits.clone(),
            line_id: line_id.to_string(),
            staged: Vec::new(),
            _guard: guard,
        }))
    }

    async fn lines(&self) -> Result<Vec<Line>, StoreError> {
        Ok(self.tables.read().lines.values().cloned().collect())
    }

    async fn line(&self, id: &str) -> Result<Option<Line>, StoreError> {
        Ok(self.tables.read().lines.get(id).cloned())
    }

    async fn save_line(&self, line: &Line) -> Result<(), StoreError> {
        self.tables.write().lines.insert(line.id.clone(), line.clone());
        Ok(())
    }

    async fn disturbances_for_line(&self, line_id: &str) -> Result<Vec<Disturbance>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .disturbances
            .iter()
            .filter(|d| d.line_id == line_id)
            .cloned()
            .collect())
    }

    async fn statuses_for_line(&self, line_id: &str) -> Result<Vec<Status>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .statuses
            .iter()
            .filter(|s| s.line_id == line_id)
            .cloned()
            .collect())
    }

    async fn latest_status_for_line(&self, line_id: &str) -> Result<Option<Status>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .statuses
            .iter()
            .filter(|s| s.line_id == line_id)
            .max_by_key(|s| s.time)
            .cloned())
    }
}

struct MemoryLineTx {
    tables: Arc<RwLock<Tables>>,
    failing_commits: Arc<AtomicUsize>,
    line_id: String,
    staged: Vec<Staged>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryLineTx {
    /// This line's disturbances as seen by the transaction (committed + staged)
    fn view(&self) -> Result<Vec<Disturbance>, StoreError> {
        let mut tables = Tables {
            disturbances: self
                .tables
                .read()
                .disturbances
                .iter()
                .filter(|d| d.line_id == self.line_id)
                .cloned()
                .collect(),
            ..Default::default()
        };
        for op in &self.staged {
            apply(&mut tables, op)?;
        }
        Ok(tables.disturbances)
    }
}

#[async_trait]
impl LineTx for MemoryLineTx {
    async fn open_disturbance(&mut self) -> Result<Option<Disturbance>, StoreError> {
        Ok(self.view()?.into_iter().find(|d| d.is_open()))
    }

    async fn last_closed_disturbance(&mut self) -> Result<Option<Disturbance>, StoreError> {
        Ok(self
            .view()?
            .into_iter()
            .filter(|d| d.u_ended)
            .max_by_key(|d| d.u_end_time)
            .map(|mut d| {
                d.statuses.clear();
                d
            }))
    }

    async fn save_disturbance(&mut self, disturbance: &Disturbance) -> Result<(), StoreError> {
        if disturbance.line_id != self.line_id {
            return Err(StoreError::Conflict(format!(
                "disturbance for line {} written in transaction for line {}",
                disturbance.line_id, self.line_id
            )));
        }
        self.staged.push(Staged::Disturbance(disturbance.clone()));
        Ok(())
    }

    async fn insert_status(&mut self, status: &Status, disturbance_id: Option<Uuid>) -> Result<(), StoreError> {
        self.staged.push(Staged::Status {
            status: status.clone(),
            disturbance_id,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);

        let should_fail = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let mut tables = self.tables.write();
        let mut next = tables.clone();
        for op in &staged {
            apply(&mut next, op)?;
        }

        let open = next
            .disturbances
            .iter()
            .filter(|d| d.line_id == self.line_id && d.is_open())
            .count();
        if open > 1 {
            return Err(StoreError::Conflict(format!(
                "line {} would have {} open disturbances",
                self.line_id, open
            )));
        }

        *tables = next;
        Ok(())
    }
}

fn apply(tables: &mut Tables, op: &Staged) -> Result<(), StoreError> {
    match op {
        Staged::Disturbance(d) => {
            match tables.disturbances.iter_mut().find(|existing| existing.id == d.id) {
                Some(existing) => {
                    let statuses = std::mem::take(&mut existing.statuses);
                    *existing = Disturbance { statuses, ..d.clone() };
                }
                None => tables.disturbances.push(Disturbance {
                    statuses: Vec::new(),
                    ..d.clone()
                }),
            }
        }
        Staged::Status { status, disturbance_id } => {
            if let Some(id) = disturbance_id {
                let target = tables
                    .disturbances
                    .iter_mut()
                    .find(|d| d.id == *id)
                    .ok_or_else(|| StoreError::Conflict(format!("unknown disturbance {id}")))?;
                target.statuses.push(status.clone());
            }
            tables.statuses.push(status.clone());
        }
    }
    Ok(())
}
