//! Per-operator session
//!
//! A session owns the grid, the pending-write tracker and the reconciliation
//! task of one logged-in operator. It is created by an initial full load and
//! torn down on logout, which stops the loop and drops all grid state.

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::command::{PaintReport, ResetReport, WriteOutcome, WriteThrough};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::models::{
    CategoryStats, CellKey, GridSummary, HistoryRecord, Status, StatusLegend, Task, User,
};
use crate::pending::{PendingTracker, SyncStrategy};
use crate::snapshot;
use crate::store::ListStore;
use crate::sync::{LoopState, Reconciler, TickOutcome};

/// Reference date of status rows (`YYYY-MM-DD`, UTC)
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Mutable state shared by the loop and the write commands
#[derive(Debug)]
pub struct SessionState {
    pub grid: Grid,
    pub tracker: PendingTracker,
    /// Status list version at the last merge
    pub version: Option<String>,
    /// Bumped whenever a displayed value changes
    pub revision: u64,
    /// Bumped when a reset clears the grid; rows fetched under an older
    /// epoch predate the reset and are dropped
    pub reset_epoch: u64,
    pub loaded: bool,
}

/// Everything the loop and the commands need, owned by one session
pub struct SyncContext {
    pub store: Arc<dyn ListStore>,
    pub user: User,
    pub settings: SyncConfig,
    pub state: Mutex<SessionState>,
    pub reset_in_flight: AtomicBool,
}

/// Sync indicator shown next to the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncIndicator {
    /// Merging suspended by local activity
    Paused,
    /// Poll or merge in flight
    Syncing,
    Live,
}

/// Point-in-time copy of the grid
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub revision: u64,
    pub locations: Vec<String>,
    pub tasks: Vec<Task>,
    pub pending_writes: usize,
    pub strategy: SyncStrategy,
    pub sync: SyncIndicator,
    pub legend: Vec<StatusLegend>,
}

/// Names that may sign a reset
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUsers {
    pub names: Vec<String>,
    /// Preselected when exactly one name is registered
    pub suggested: Option<String>,
}

/// Operator-facing operations on the grid
#[async_trait]
pub trait GridController: Send + Sync {
    async fn grid(&self) -> Result<GridView>;

    /// Click on a cell: `forced` wins, then the active `tool`, then the cycle
    async fn on_cell_interaction(
        &self,
        task_id: &str,
        location: &str,
        forced: Option<Status>,
        tool: Option<Status>,
    ) -> Result<WriteOutcome>;

    async fn on_row_paint(&self, task_id: &str, status: Status) -> Result<PaintReport>;

    async fn on_reset(&self, responsible: &str) -> Result<ResetReport>;

    async fn history(&self) -> Result<Vec<HistoryRecord>>;

    async fn registered_users(&self) -> Result<RegisteredUsers>;

    async fn category_stats(&self) -> Result<Vec<CategoryStats>>;

    /// Whole-grid and per-location status counts
    async fn summary(&self) -> Result<GridSummary>;

    async fn sync_status(&self) -> SyncIndicator;
}

pub struct Session {
    ctx: Arc<SyncContext>,
    commands: Arc<WriteThrough>,
    reconciler: Arc<Reconciler>,
    shutdown: Arc<Notify>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Load tasks, locations and today's status, then start reconciling.
    ///
    /// The loop only starts once the grid is fully populated.
    pub async fn start(
        store: Arc<dyn ListStore>,
        user: User,
        settings: SyncConfig,
    ) -> Result<Self> {
        let token = &user.access_token;

        let records = store.fetch_tasks(token).await?;
        let locations = store.fetch_locations_for_user(token, &user.email).await?;
        // Version first: a change landing between the two calls is picked up by the next poll.
        let version = store.fetch_list_version(token, &settings.status_list).await?;
        let rows = store.fetch_status_rows(token, &today()).await?;

        let grid = Grid::build(records, locations, &rows, &Utc::now().to_rfc3339());
        tracing::info!(
            email = %user.email,
            tasks = grid.tasks().len(),
            locations = grid.locations().len(),
            %version,
            "Grid loaded"
        );

        let tracker = PendingTracker::new(
            settings.strategy,
            settings.cooldown(),
            settings.ledger_max_age(),
        );

        let ctx = Arc::new(SyncContext {
            store,
            user,
            settings,
            state: Mutex::new(SessionState {
                grid,
                tracker,
                version: Some(version),
                revision: 1,
                reset_epoch: 0,
                loaded: true,
            }),
            reset_in_flight: AtomicBool::new(false),
        });

        let session = Self {
            commands: Arc::new(WriteThrough::new(Arc::clone(&ctx))),
            reconciler: Arc::new(Reconciler::new(Arc::clone(&ctx))),
            ctx,
            shutdown: Arc::new(Notify::new()),
            task: std::sync::Mutex::new(None),
        };

        session.save_partial_snapshot().await;
        session.spawn_loop();

        Ok(session)
    }

    fn spawn_loop(&self) {
        let handle = tokio::spawn(Arc::clone(&self.reconciler).run(Arc::clone(&self.shutdown)));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Shift-handover safety net; failures are only logged
    async fn save_partial_snapshot(&self) {
        let tasks = self.ctx.state.lock().await.grid.snapshot();
        let result = snapshot::save_partial_if_due(
            self.ctx.store.as_ref(),
            &self.ctx.user,
            tasks,
            &self.ctx.settings,
            Local::now().fixed_offset(),
        )
        .await;

        match result {
            Ok(Some(record)) => {
                tracing::info!(id = %record.id, "Saved shift-handover snapshot");
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Shift-handover snapshot skipped"),
        }
    }

    pub fn user(&self) -> &User {
        &self.ctx.user
    }

    /// Run one reconciliation cycle now
    pub async fn sync_now(&self) -> TickOutcome {
        self.reconciler.tick().await
    }

    pub fn loop_state(&self) -> LoopState {
        self.reconciler.state()
    }

    /// Value the operator last wrote to a cell and that the remote has not confirmed
    pub async fn pending_value(&self, task_id: &str, location: &str) -> Option<Status> {
        let state = self.ctx.state.lock().await;
        state
            .tracker
            .pending_value(&CellKey::new(task_id, location))
    }

    pub async fn get(&self, task_id: &str, location: &str) -> Status {
        self.ctx.state.lock().await.grid.get(task_id, location)
    }

    /// Stop the loop and drop all grid state
    pub async fn teardown(&self) {
        self.shutdown.notify_one();
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Reconciliation task ended abnormally");
        }

        let mut state = self.ctx.state.lock().await;
        state.loaded = false;
        state.grid = Grid::default();
        state.tracker.clear();
        state.version = None;
        state.revision += 1;

        tracing::info!(email = %self.ctx.user.email, "Session closed");
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn loaded_state(&self) -> Result<tokio::sync::MutexGuard<'_, SessionState>> {
        let state = self.ctx.state.lock().await;
        if !state.loaded {
            return Err(Error::NotLoaded);
        }
        Ok(state)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl GridController for Session {
    async fn grid(&self) -> Result<GridView> {
        let sync = self.sync_status().await;
        let state = self.loaded_state().await?;
        Ok(GridView {
            revision: state.revision,
            locations: state.grid.locations().to_vec(),
            tasks: state.grid.snapshot(),
            pending_writes: state.tracker.pending_count(),
            strategy: state.tracker.strategy(),
            sync,
            legend: StatusLegend::all(),
        })
    }

    async fn on_cell_interaction(
        &self,
        task_id: &str,
        location: &str,
        forced: Option<Status>,
        tool: Option<Status>,
    ) -> Result<WriteOutcome> {
        let cell = CellKey::new(task_id, location);
        let current = {
            let state = self.loaded_state().await?;
            state.grid.check_cell(&cell)?;
            state.grid.get(task_id, location)
        };

        let target = forced.or(tool).unwrap_or_else(|| current.next());
        self.commands.write_cell(cell, target).await
    }

    async fn on_row_paint(&self, task_id: &str, status: Status) -> Result<PaintReport> {
        self.loaded_state().await?;
        self.commands.paint_row(task_id, status).await
    }

    async fn on_reset(&self, responsible: &str) -> Result<ResetReport> {
        self.loaded_state().await?;
        self.commands.reset(responsible).await
    }

    async fn history(&self) -> Result<Vec<HistoryRecord>> {
        let mut history = self
            .ctx
            .store
            .fetch_history(&self.ctx.user.access_token, &self.ctx.user.email)
            .await?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(history)
    }

    async fn registered_users(&self) -> Result<RegisteredUsers> {
        let names = self
            .ctx
            .store
            .fetch_registered_user_names(&self.ctx.user.access_token, &self.ctx.user.email)
            .await?;
        let suggested = match names.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        Ok(RegisteredUsers { names, suggested })
    }

    async fn category_stats(&self) -> Result<Vec<CategoryStats>> {
        let state = self.loaded_state().await?;
        Ok(state.grid.category_stats())
    }

    async fn summary(&self) -> Result<GridSummary> {
        let state = self.loaded_state().await?;
        Ok(state.grid.summary())
    }

    async fn sync_status(&self) -> SyncIndicator {
        if self.ctx.reset_in_flight.load(Ordering::Acquire) {
            return SyncIndicator::Paused;
        }
        if self.ctx.state.lock().await.tracker.blocks_merge(Instant::now()) {
            return SyncIndicator::Paused;
        }
        match self.reconciler.state() {
            LoopState::Idle => SyncIndicator::Live,
            LoopState::Polling | LoopState::Merging => SyncIndicator::Syncing,
        }
    }
}
