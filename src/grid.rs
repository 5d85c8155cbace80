//! In-memory status grid (task × location)

use std::collections::HashMap;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{
    CategoryStats, CellKey, GridSummary, LocationStats, Status, StatusRow, Task, TaskRecord,
    normalize_category,
};
use crate::pending::{CellDecision, PendingTracker};

/// Result of one remote merge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Cells whose displayed value changed
    pub changed: usize,
    /// Pending writes confirmed by the remote
    pub confirmed: usize,
    /// Cells kept at their pending value
    pub held: usize,
    /// Pending writes dropped for age
    pub expired: usize,
}

/// The displayed checklist grid of one session
#[derive(Debug, Clone, Default)]
pub struct Grid {
    tasks: Vec<Task>,
    locations: Vec<String>,
}

impl Grid {
    /// Build the grid from the initial load.
    ///
    /// Inactive tasks are left out. Every remaining task gets an entry for
    /// every location, taken from `rows` or defaulted to `PR`.
    pub fn build(
        records: Vec<TaskRecord>,
        locations: Vec<String>,
        rows: &[StatusRow],
        created_at: &str,
    ) -> Self {
        let remote = index_rows(rows);

        let tasks = records
            .into_iter()
            .filter(|r| r.active)
            .map(|r| {
                let operations = locations
                    .iter()
                    .map(|loc| {
                        let status = remote
                            .get(&(r.id.as_str(), loc.as_str()))
                            .copied()
                            .unwrap_or_default();
                        (loc.clone(), status)
                    })
                    .collect();

                Task {
                    id: r.id,
                    title: r.title,
                    description: r.description,
                    category: normalize_category(Some(&r.category)),
                    time_range: r.time_range,
                    created_at: created_at.to_string(),
                    active: true,
                    operations,
                }
            })
            .collect();

        Self { tasks, locations }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// Displayed value of a cell, `PR` when nothing is recorded
    pub fn get(&self, task_id: &str, location: &str) -> Status {
        self.task(task_id)
            .map(|t| t.status_at(location))
            .unwrap_or_default()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Fail unless the cell is part of this grid
    pub fn check_cell(&self, cell: &CellKey) -> Result<()> {
        if self.task(&cell.task_id).is_none() {
            return Err(Error::UnknownTask(cell.task_id.clone()));
        }
        if !self.locations.iter().any(|l| *l == cell.location) {
            return Err(Error::UnknownLocation(cell.location.clone()));
        }
        Ok(())
    }

    /// Every cell of the grid, tasks in display order
    pub fn cells(&self) -> Vec<CellKey> {
        self.tasks
            .iter()
            .flat_map(|t| {
                self.locations
                    .iter()
                    .map(move |loc| CellKey::new(t.id.clone(), loc.clone()))
            })
            .collect()
    }

    /// Optimistic overwrite; returns the previous value
    pub fn apply_local(&mut self, cell: &CellKey, status: Status) -> Result<Status> {
        self.check_cell(cell)?;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == cell.task_id)
            .ok_or_else(|| Error::UnknownTask(cell.task_id.clone()))?;

        Ok(task
            .operations
            .insert(cell.location.clone(), status)
            .unwrap_or_default())
    }

    /// Merge polled rows, deferring to the pending tracker per cell.
    ///
    /// Cells missing from `rows` are read as `PR`.
    pub fn merge_remote(
        &mut self,
        rows: &[StatusRow],
        tracker: &mut PendingTracker,
        now: Instant,
    ) -> MergeOutcome {
        let remote = index_rows(rows);
        let mut outcome = MergeOutcome::default();

        for task in &mut self.tasks {
            for loc in &self.locations {
                let remote_status = remote
                    .get(&(task.id.as_str(), loc.as_str()))
                    .copied()
                    .unwrap_or_default();

                let cell = CellKey::new(task.id.clone(), loc.clone());
                match tracker.reconcile(&cell, remote_status, now) {
                    CellDecision::Hold => {
                        outcome.held += 1;
                        continue;
                    }
                    CellDecision::Confirmed => outcome.confirmed += 1,
                    CellDecision::Expired => outcome.expired += 1,
                    CellDecision::Apply => {}
                }

                if task.status_at(loc) != remote_status {
                    task.operations.insert(loc.clone(), remote_status);
                    outcome.changed += 1;
                }
            }
        }

        outcome
    }

    /// Set every cell to `PR`
    pub fn reset_all(&mut self) {
        for task in &mut self.tasks {
            for loc in &self.locations {
                task.operations.insert(loc.clone(), Status::Pr);
            }
        }
    }

    /// Deep copy of the tasks, independent of later grid mutation
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    /// Share of `OK` cells per category, categories in first-seen order
    pub fn category_stats(&self) -> Vec<CategoryStats> {
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

        for task in &self.tasks {
            let category = task.category.as_str();
            let entry = counts.entry(category).or_insert_with(|| {
                order.push(category);
                (0, 0)
            });
            for loc in &self.locations {
                entry.0 += 1;
                if task.status_at(loc) == Status::Ok {
                    entry.1 += 1;
                }
            }
        }

        order
            .into_iter()
            .map(|category| {
                let (total_cells, ok_cells) = counts[category];
                CategoryStats {
                    category: category.to_string(),
                    total_cells,
                    ok_cells,
                    percent: percent_of(ok_cells, total_cells),
                    is_complete: total_cells > 0 && ok_cells == total_cells,
                }
            })
            .collect()
    }

    /// Count `OK`, `PR` and issue cells across the grid and per location
    pub fn summary(&self) -> GridSummary {
        let mut locations: Vec<LocationStats> = self
            .locations
            .iter()
            .map(|loc| {
                let mut stats = LocationStats {
                    location: loc.clone(),
                    short_name: short_location(loc).to_string(),
                    ok: 0,
                    pending: 0,
                    issues: 0,
                };
                for task in &self.tasks {
                    match task.status_at(loc) {
                        Status::Ok => stats.ok += 1,
                        Status::Pr => stats.pending += 1,
                        _ => stats.issues += 1,
                    }
                }
                stats
            })
            .collect();

        let ok_cells: usize = locations.iter().map(|l| l.ok).sum();
        let pending_cells: usize = locations.iter().map(|l| l.pending).sum();
        let issue_cells: usize = locations.iter().map(|l| l.issues).sum();
        let total_cells = ok_cells + pending_cells + issue_cells;

        locations.sort_by(|a, b| {
            b.issues
                .cmp(&a.issues)
                .then_with(|| a.short_name.cmp(&b.short_name))
        });

        GridSummary {
            total_cells,
            ok_cells,
            pending_cells,
            issue_cells,
            percent: percent_of(ok_cells, total_cells),
            locations,
        }
    }
}

fn percent_of(part: usize, total: usize) -> u8 {
    if total == 0 {
        0
    } else {
        ((part as f64 / total as f64) * 100.0).round() as u8
    }
}

fn short_location(location: &str) -> &str {
    location
        .strip_prefix("LAT-")
        .or_else(|| location.strip_prefix("ITA-"))
        .unwrap_or(location)
}

fn index_rows(rows: &[StatusRow]) -> HashMap<(&str, &str), Status> {
    rows.iter()
        .map(|r| ((r.task_id.as_str(), r.location_key.as_str()), r.status))
        .collect()
}
