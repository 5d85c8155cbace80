//! Write-through commands: optimistic cell writes, row paint and full reset

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{CellKey, HistoryRecord, Status, StatusUpsert};
use crate::pending::SyncStrategy;
use crate::session::{SyncContext, today};

/// Result of a single-cell write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    /// Cell already held the value; nothing sent
    Unchanged,
    Written,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintReport {
    pub task_id: String,
    pub status: Status,
    pub written: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub history_id: String,
    pub cells: usize,
    pub reset_by: String,
}

pub struct WriteThrough {
    ctx: Arc<SyncContext>,
}

/// Clears the reset flag however the reset ends
struct ResetGuard<'a>(&'a AtomicBool);

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl WriteThrough {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Write one cell: tracker first, then the optimistic grid, then the remote.
    ///
    /// With the ledger strategy a rejected write keeps the optimistic value;
    /// with the cooldown strategy the cell is rolled back. Both surface the error.
    pub async fn write_cell(&self, cell: CellKey, status: Status) -> Result<WriteOutcome> {
        let previous = {
            let mut state = self.ctx.state.lock().await;
            state.grid.check_cell(&cell)?;
            if state.grid.get(&cell.task_id, &cell.location) == status {
                return Ok(WriteOutcome::Unchanged);
            }

            state.tracker.begin_write(&cell, status, Instant::now());
            let previous = state.grid.apply_local(&cell, status)?;
            state.revision += 1;
            previous
        };

        let upsert = StatusUpsert::new(&today(), &cell, status, &self.ctx.user.name);
        let result = self
            .ctx
            .store
            .upsert_status(&self.ctx.user.access_token, &upsert)
            .await;

        let mut state = self.ctx.state.lock().await;
        state.tracker.end_write(Instant::now());

        match result {
            Ok(()) => {
                tracing::debug!(%cell, %status, "Status saved");
                Ok(WriteOutcome::Written)
            }
            Err(e) => {
                tracing::error!(%cell, %status, error = %e, "Failed to save status");

                // Only undo our own value; a later write to the same cell wins.
                if state.tracker.strategy() == SyncStrategy::Cooldown
                    && state.grid.get(&cell.task_id, &cell.location) == status
                {
                    state.grid.apply_local(&cell, previous)?;
                    state.revision += 1;
                }

                Err(Error::WriteRejected {
                    cell,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Write `status` to every location of one task.
    ///
    /// The location list is captured up front; writes run concurrently and the
    /// first failure is returned once all of them settled.
    pub async fn paint_row(self: &Arc<Self>, task_id: &str, status: Status) -> Result<PaintReport> {
        let locations = {
            let state = self.ctx.state.lock().await;
            if state.grid.task(task_id).is_none() {
                return Err(Error::UnknownTask(task_id.to_string()));
            }
            state.grid.locations().to_vec()
        };

        let mut writes = JoinSet::new();
        for location in locations {
            let this = Arc::clone(self);
            let cell = CellKey::new(task_id, location);
            writes.spawn(async move { this.write_cell(cell, status).await });
        }

        let mut report = PaintReport {
            task_id: task_id.to_string(),
            status,
            written: 0,
            unchanged: 0,
        };
        let mut first_error = None;

        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok(Ok(WriteOutcome::Written)) => report.written += 1,
                Ok(Ok(WriteOutcome::Unchanged)) => report.unchanged += 1,
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(Error::Other(format!("paint task failed: {e}")));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(task_id, %status, written = report.written, "Row painted");
                Ok(report)
            }
        }
    }

    /// Snapshot the grid to history, write `PR` to every cell remotely, and
    /// only then clear the local grid. At most one reset runs at a time.
    ///
    /// No compensation is attempted when some cell writes fail: the grid is
    /// left untouched and the reset can simply be retried.
    pub async fn reset(self: &Arc<Self>, responsible: &str) -> Result<ResetReport> {
        let responsible = responsible.trim();
        if responsible.is_empty() {
            return Err(Error::InvalidRequest("a responsible name is required".to_string()));
        }

        if self
            .ctx
            .reset_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ResetInProgress);
        }
        let _guard = ResetGuard(&self.ctx.reset_in_flight);

        let (tasks, cells) = {
            let state = self.ctx.state.lock().await;
            (state.grid.snapshot(), state.grid.cells())
        };

        let record = HistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            tasks,
            reset_by: responsible.to_string(),
            email: self.ctx.user.email.clone(),
            is_partial: false,
        };

        self.ctx
            .store
            .save_history(&self.ctx.user.access_token, &record)
            .await
            .map_err(|e| Error::Reset(format!("failed to save history: {e}")))?;

        tracing::info!(id = %record.id, reset_by = responsible, "History saved, resetting cells");

        let date = today();
        let total = cells.len();
        let mut writes = JoinSet::new();
        for cell in cells {
            let store = Arc::clone(&self.ctx.store);
            let token = self.ctx.user.access_token.clone();
            let upsert = StatusUpsert::new(&date, &cell, Status::Pr, responsible);
            writes.spawn(async move {
                store
                    .upsert_status(&token, &upsert)
                    .await
                    .map_err(|e| (cell, e))
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((cell, e))) => {
                    tracing::error!(%cell, error = %e, "Reset write failed");
                    failures.push(e);
                }
                Err(e) => failures.push(Error::Other(format!("reset task failed: {e}"))),
            }
        }

        if let Some(first) = failures.first() {
            return Err(Error::Reset(format!(
                "{} of {} cells were not saved: {}",
                failures.len(),
                total,
                first
            )));
        }

        {
            let mut state = self.ctx.state.lock().await;
            state.grid.reset_all();
            state.tracker.clear();
            state.reset_epoch += 1;
            state.revision += 1;
        }

        tracing::info!(id = %record.id, cells = total, "Checklist reset");

        Ok(ResetReport {
            history_id: record.id,
            cells: total,
            reset_by: responsible.to_string(),
        })
    }
}
