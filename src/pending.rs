//! Pending-write tracking
//!
//! Decides whether a polled remote value may overwrite a cell the local
//! operator has just written. Two strategies are supported:
//!
//! - [`PendingLedger`]: per-cell record of the last written value; a cell
//!   resists remote overwrite until the remote value matches what was written.
//! - [`CooldownGate`]: one global switch that suspends merging entirely while
//!   writes are in flight and for a cooldown window afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{CellKey, Status};

/// Reconciliation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Per-cell pending ledger
    #[default]
    Ledger,
    /// Global sync pause with cooldown
    Cooldown,
}

/// What the merge pass should do with one remote cell value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellDecision {
    /// No pending write, take the remote value
    Apply,
    /// Remote caught up with our write; entry dropped
    Confirmed,
    /// Remote still disagrees with our write; keep the local value
    Hold,
    /// Entry was older than the ledger max age; entry dropped, remote wins
    Expired,
}

/// An unconfirmed local write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub value: Status,
    pub written_at: Instant,
}

#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: HashMap<CellKey, PendingWrite>,
    max_age: Option<Duration>,
}

impl PendingLedger {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            max_age,
        }
    }

    /// Record a write; a later write to the same cell replaces the earlier one
    pub fn record(&mut self, cell: CellKey, value: Status, now: Instant) {
        self.entries.insert(
            cell,
            PendingWrite {
                value,
                written_at: now,
            },
        );
    }

    pub fn get(&self, cell: &CellKey) -> Option<Status> {
        self.entries.get(cell).map(|p| p.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn reconcile(&mut self, cell: &CellKey, remote: Status, now: Instant) -> CellDecision {
        let Some(pending) = self.entries.get(cell).copied() else {
            return CellDecision::Apply;
        };

        if pending.value == remote {
            self.entries.remove(cell);
            return CellDecision::Confirmed;
        }

        if let Some(max_age) = self.max_age
            && now.saturating_duration_since(pending.written_at) >= max_age
        {
            self.entries.remove(cell);
            return CellDecision::Expired;
        }

        CellDecision::Hold
    }
}

/// Global "sync blocked" switch with a restartable cooldown timer
#[derive(Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    in_flight: usize,
    blocked_until: Option<Instant>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            in_flight: 0,
            blocked_until: None,
        }
    }

    /// Block until the matching [`release`](Self::release)
    pub fn hold(&mut self) {
        self.in_flight += 1;
    }

    /// End one held interaction and (re)start the cooldown
    pub fn release(&mut self, now: Instant) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.touch(now);
    }

    /// Block and (re)start the cooldown
    pub fn touch(&mut self, now: Instant) {
        self.blocked_until = Some(now + self.cooldown);
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.in_flight > 0 || self.blocked_until.is_some_and(|until| now < until)
    }

    pub fn clear(&mut self) {
        self.in_flight = 0;
        self.blocked_until = None;
    }
}

/// The pending-write tracker of one session
#[derive(Debug)]
pub enum PendingTracker {
    Ledger(PendingLedger),
    Cooldown(CooldownGate),
}

impl PendingTracker {
    pub fn new(strategy: SyncStrategy, cooldown: Duration, max_age: Option<Duration>) -> Self {
        match strategy {
            SyncStrategy::Ledger => Self::Ledger(PendingLedger::new(max_age)),
            SyncStrategy::Cooldown => Self::Cooldown(CooldownGate::new(cooldown)),
        }
    }

    pub fn strategy(&self) -> SyncStrategy {
        match self {
            Self::Ledger(_) => SyncStrategy::Ledger,
            Self::Cooldown(_) => SyncStrategy::Cooldown,
        }
    }

    /// Called before the optimistic update, ahead of the remote call
    pub fn begin_write(&mut self, cell: &CellKey, value: Status, now: Instant) {
        match self {
            Self::Ledger(ledger) => ledger.record(cell.clone(), value, now),
            Self::Cooldown(gate) => gate.hold(),
        }
    }

    /// Called once the remote call settled, whatever its outcome
    pub fn end_write(&mut self, now: Instant) {
        if let Self::Cooldown(gate) = self {
            gate.release(now);
        }
    }

    /// Whether the merge step must be skipped entirely this pass
    pub fn blocks_merge(&self, now: Instant) -> bool {
        match self {
            Self::Ledger(_) => false,
            Self::Cooldown(gate) => gate.is_blocked(now),
        }
    }

    pub fn reconcile(&mut self, cell: &CellKey, remote: Status, now: Instant) -> CellDecision {
        match self {
            Self::Ledger(ledger) => ledger.reconcile(cell, remote, now),
            Self::Cooldown(_) => CellDecision::Apply,
        }
    }

    pub fn pending_value(&self, cell: &CellKey) -> Option<Status> {
        match self {
            Self::Ledger(ledger) => ledger.get(cell),
            Self::Cooldown(_) => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        match self {
            Self::Ledger(ledger) => ledger.len(),
            Self::Cooldown(_) => 0,
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::Ledger(ledger) => ledger.clear(),
            Self::Cooldown(gate) => gate.clear(),
        }
    }
}
