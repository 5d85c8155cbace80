//! Checklist data models (shared between the dashboard and the list store)
//!
//! Uses String for IDs and timestamps so the wire shape stays stable across clients.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Category used when a task has none
pub const DEFAULT_CATEGORY: &str = "Geral";

/// Checklist status of one (task, location) cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    /// Pending
    #[default]
    #[serde(rename = "PR")]
    Pr,
    /// Done
    #[serde(rename = "OK")]
    Ok,
    /// In progress
    #[serde(rename = "EA")]
    Ea,
    /// Awaiting reply
    #[serde(rename = "AR")]
    Ar,
    /// Needs update
    #[serde(rename = "ATT")]
    Att,
    /// Late
    #[serde(rename = "AT")]
    At,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Ok,
        Status::Ea,
        Status::Ar,
        Status::Att,
        Status::At,
        Status::Pr,
    ];

    /// Next status in the click-to-cycle order OK→EA→AR→ATT→AT→PR→OK
    pub fn next(self) -> Status {
        match self {
            Status::Ok => Status::Ea,
            Status::Ea => Status::Ar,
            Status::Ar => Status::Att,
            Status::Att => Status::At,
            Status::At => Status::Pr,
            Status::Pr => Status::Ok,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pr => "PR",
            Status::Ok => "OK",
            Status::Ea => "EA",
            Status::Ar => "AR",
            Status::Att => "ATT",
            Status::At => "AT",
        }
    }

    /// Operator-facing description
    pub fn description(self) -> &'static str {
        match self {
            Status::Pr => "Pendente",
            Status::Ok => "Concluído",
            Status::Ea => "Em Andamento",
            Status::Ar => "Aguardando Retorno",
            Status::Att => "Atualizar",
            Status::At => "Atrasado",
        }
    }

    pub fn shortcut(self) -> char {
        match self {
            Status::Ok => '1',
            Status::Ea => '2',
            Status::Att => '3',
            Status::Ar => '4',
            Status::At => '5',
            Status::Pr => '6',
        }
    }

    /// Keyboard shortcut that selects this status as the active tool
    pub fn from_shortcut(key: char) -> Option<Status> {
        match key {
            '1' => Some(Status::Ok),
            '2' => Some(Status::Ea),
            '3' => Some(Status::Att),
            '4' => Some(Status::Ar),
            '5' => Some(Status::At),
            '6' => Some(Status::Pr),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PR" => Ok(Status::Pr),
            "OK" => Ok(Status::Ok),
            "EA" => Ok(Status::Ea),
            "AR" => Ok(Status::Ar),
            "ATT" => Ok(Status::Att),
            "AT" => Ok(Status::At),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Identity of one synchronized cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub task_id: String,
    pub location: String,
}

impl CellKey {
    pub fn new(task_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            location: location.into(),
        }
    }

    /// Deterministic remote row key: one row per cell per day
    pub fn idempotency_key(&self, date: &str) -> String {
        format!("{}_{}_{}", date.replace('-', ""), self.task_id, self.location)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.task_id, self.location)
    }
}

/// A checklist task as displayed in the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category", deserialize_with = "category_or_default")]
    pub category: String,
    #[serde(default)]
    pub time_range: String,
    pub created_at: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Location key -> status
    #[serde(default)]
    pub operations: BTreeMap<String, Status>,
}

impl Task {
    pub fn status_at(&self, location: &str) -> Status {
        self.operations.get(location).copied().unwrap_or_default()
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Blank or null categories fall back to [`DEFAULT_CATEGORY`]
pub fn normalize_category(category: Option<&str>) -> String {
    match category.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => default_category(),
    }
}

fn category_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let category = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_category(category.as_deref()))
}

fn default_active() -> bool {
    true
}

/// A task as stored in the remote task list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category", deserialize_with = "category_or_default")]
    pub category: String,
    #[serde(default)]
    pub time_range: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// A status row as stored in the remote status list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub task_id: String,
    pub location_key: String,
    pub status: Status,
    #[serde(default)]
    pub user: String,
}

/// Write of one cell to the remote status list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpsert {
    pub date: String,
    pub task_id: String,
    pub location_key: String,
    pub status: Status,
    pub user: String,
    pub idempotency_key: String,
}

impl StatusUpsert {
    pub fn new(date: &str, cell: &CellKey, status: Status, user: &str) -> Self {
        Self {
            date: date.to_string(),
            task_id: cell.task_id.clone(),
            location_key: cell.location.clone(),
            status,
            user: user.to_string(),
            idempotency_key: cell.idempotency_key(date),
        }
    }
}

/// Immutable snapshot of the whole grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub reset_by: String,
    #[serde(default)]
    pub email: String,
    /// Automatic shift-handover snapshot rather than an operator reset
    #[serde(default)]
    pub is_partial: bool,
}

impl HistoryRecord {
    /// Calendar day (`YYYY-MM-DD`) of the record timestamp
    pub fn day(&self) -> &str {
        self.timestamp.split('T').next().unwrap_or_default()
    }
}

/// Catalog entry of a remote list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

/// Mutation marker of a remote list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVersion {
    pub list_id: String,
    pub version: String,
}

/// Login credential presented by an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub email: String,
    pub password: String,
}

/// Bearer credential for the list store
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A logged-in operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub name: String,
    pub access_token: AccessToken,
}

/// Progress of one task category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: String,
    pub total_cells: usize,
    pub ok_cells: usize,
    pub percent: u8,
    pub is_complete: bool,
}

/// Status counts for one location column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStats {
    pub location: String,
    /// Location without its regional prefix, for chart labels
    pub short_name: String,
    pub ok: usize,
    pub pending: usize,
    /// Cells in `EA`, `AR`, `ATT` or `AT`
    pub issues: usize,
}

/// Whole-grid counts plus the per-location breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSummary {
    pub total_cells: usize,
    pub ok_cells: usize,
    pub pending_cells: usize,
    pub issue_cells: usize,
    pub percent: u8,
    /// Most issues first, then by short name
    pub locations: Vec<LocationStats>,
}

/// One entry of the status legend shown next to the grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLegend {
    pub code: Status,
    pub description: &'static str,
    pub shortcut: char,
}

impl StatusLegend {
    pub fn all() -> Vec<StatusLegend> {
        Status::ALL
            .iter()
            .map(|&code| StatusLegend {
                code,
                description: code.description(),
                shortcut: code.shortcut(),
            })
            .collect()
    }
}
