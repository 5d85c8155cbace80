//! Reconciliation loop
//!
//! Polls the status list version on a fixed period and, only when it moved,
//! fetches today's rows and merges them into the grid under the pending-write
//! tracker's rules. Failures are logged and retried on the next tick.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::grid::MergeOutcome;
use crate::session::{SyncContext, today};

/// State of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Polling,
    Merging,
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous poll was still in flight
    Skipped,
    /// Version token unchanged; no rows fetched
    Unchanged,
    /// Merging is suspended by local activity; token refreshed, rows not fetched
    Paused,
    /// A reset ran while the rows were in flight; token kept so the next tick merges
    Deferred,
    Merged(MergeOutcome),
    /// Fetch failed; token kept so the next tick retries
    Failed,
}

pub struct Reconciler {
    ctx: Arc<SyncContext>,
    in_flight: AtomicBool,
    state: watch::Sender<LoopState>,
}

impl Reconciler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            ctx,
            in_flight: AtomicBool::new(false),
            state,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Run ticks on the configured period until `shutdown` is notified
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) {
        let mut interval = tokio::time::interval(self.ctx.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the initial load already fetched.
        interval.tick().await;

        tracing::info!(
            email = %self.ctx.user.email,
            period_secs = self.ctx.settings.poll_interval().as_secs(),
            "Reconciliation loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }

        self.state.send_replace(LoopState::Idle);
        self.in_flight.store(false, Ordering::Release);
        tracing::info!(email = %self.ctx.user.email, "Reconciliation loop stopped");
    }

    /// One poll cycle; at most one runs at a time
    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Previous poll still in flight, skipping tick");
            return TickOutcome::Skipped;
        }

        let outcome = self.poll().await;

        self.state.send_replace(LoopState::Idle);
        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    async fn poll(&self) -> TickOutcome {
        let ctx = &self.ctx;
        self.state.send_replace(LoopState::Polling);

        let version = match ctx
            .store
            .fetch_list_version(&ctx.user.access_token, &ctx.settings.status_list)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(error = %e, transient = e.is_transient(), "Version poll failed");
                return TickOutcome::Failed;
            }
        };

        let epoch = {
            let mut state = ctx.state.lock().await;
            if !state.loaded {
                return TickOutcome::Skipped;
            }
            if state.version.as_deref() == Some(version.as_str()) {
                tracing::debug!(%version, "Status list unchanged");
                return TickOutcome::Unchanged;
            }
            if state.tracker.blocks_merge(Instant::now()) {
                tracing::debug!(%version, "Sync paused, skipping fetch");
                state.version = Some(version);
                return TickOutcome::Paused;
            }
            state.reset_epoch
        };

        self.state.send_replace(LoopState::Merging);

        let rows = match ctx
            .store
            .fetch_status_rows(&ctx.user.access_token, &today())
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, transient = e.is_transient(), "Status fetch failed");
                return TickOutcome::Failed;
            }
        };

        if ctx.reset_in_flight.load(Ordering::Acquire) {
            tracing::debug!("Reset in progress, deferring merge");
            return TickOutcome::Deferred;
        }

        let mut state = ctx.state.lock().await;
        if !state.loaded {
            return TickOutcome::Skipped;
        }
        if state.reset_epoch != epoch {
            tracing::debug!(%version, "Rows predate the last reset, deferring merge");
            return TickOutcome::Deferred;
        }

        let now = Instant::now();
        if state.tracker.blocks_merge(now) {
            tracing::debug!(%version, "Sync paused, skipping merge");
            state.version = Some(version);
            return TickOutcome::Paused;
        }

        let state = &mut *state;
        let outcome = state.grid.merge_remote(&rows, &mut state.tracker, now);
        if outcome.changed > 0 {
            state.revision += 1;
        }
        state.version = Some(version.clone());

        tracing::info!(
            %version,
            rows = rows.len(),
            changed = outcome.changed,
            confirmed = outcome.confirmed,
            held = outcome.held,
            expired = outcome.expired,
            "Merged remote status"
        );

        TickOutcome::Merged(outcome)
    }
}
