//! Automatic shift-handover snapshots and the history timeline

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::models::{HistoryRecord, Task, User};
use crate::store::ListStore;

/// Save one partial snapshot for today if none exists yet.
///
/// Only inside the configured daytime window and only for a non-empty grid.
/// Returns the saved record, or `None` when nothing was due.
pub async fn save_partial_if_due(
    store: &dyn ListStore,
    user: &User,
    tasks: Vec<Task>,
    settings: &SyncConfig,
    now: DateTime<FixedOffset>,
) -> Result<Option<HistoryRecord>> {
    if !settings.in_partial_window(now.hour()) || tasks.is_empty() {
        return Ok(None);
    }

    let now_utc = now.with_timezone(&Utc);
    let day = now_utc.format("%Y-%m-%d").to_string();

    let history = store.fetch_history(&user.access_token, &user.email).await?;
    if history.iter().any(|h| h.is_partial && h.day() == day) {
        return Ok(None);
    }

    let record = HistoryRecord {
        id: format!("partial_{}", now_utc.timestamp_millis()),
        timestamp: now_utc.to_rfc3339(),
        tasks,
        reset_by: user.name.clone(),
        email: user.email.clone(),
        is_partial: true,
    };
    store.save_history(&user.access_token, &record).await?;

    Ok(Some(record))
}

/// One entry of the history sidebar
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub record: HistoryRecord,
    /// Shift-handover snapshot taken the same day as this reset
    pub partial: Option<HistoryRecord>,
}

/// Records to list, newest first.
///
/// A partial snapshot is folded into the reset of the same day when there is one.
pub fn timeline(history: &[HistoryRecord]) -> Vec<TimelineEntry> {
    let mut records: Vec<&HistoryRecord> = history
        .iter()
        .filter(|r| {
            !r.is_partial || !history.iter().any(|h| !h.is_partial && h.day() == r.day())
        })
        .collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    records
        .into_iter()
        .map(|record| TimelineEntry {
            partial: partial_for(history, record).cloned(),
            record: record.clone(),
        })
        .collect()
}

/// The partial snapshot taken on the same day as a reset
pub fn partial_for<'a>(
    history: &'a [HistoryRecord],
    record: &HistoryRecord,
) -> Option<&'a HistoryRecord> {
    if record.is_partial {
        return None;
    }
    history
        .iter()
        .find(|h| h.is_partial && h.day() == record.day())
}
