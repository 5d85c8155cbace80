//! Remote list store gateway
//!
//! The sync core only talks to the remote lists through [`ListStore`]. The
//! access token is passed explicitly on every call; nothing here keeps an
//! ambient credential.

pub mod http;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AccessToken, Credential, HistoryRecord, StatusRow, StatusUpsert, TaskRecord, User,
};

pub use http::HttpStore;
pub use sqlite::SqliteStore;

/// List holding the task definitions
pub const TASKS_LIST: &str = "Tarefas_Checklist";
/// List mapping locations to operator emails
pub const OPERATIONS_LIST: &str = "Operacoes_Checklist";
/// List holding one status row per cell per day
pub const STATUS_LIST: &str = "Status_Checklist";
/// List holding grid snapshots
pub const HISTORY_LIST: &str = "Historico_checklist_web";
/// List holding registered operator names
pub const USERS_LIST: &str = "Usuarios_Checklist";

pub const ALL_LISTS: [&str; 5] = [
    TASKS_LIST,
    OPERATIONS_LIST,
    STATUS_LIST,
    HISTORY_LIST,
    USERS_LIST,
];

/// Operations the sync core needs from the remote lists
#[async_trait]
pub trait ListStore: Send + Sync + 'static {
    /// Task definitions, in display order
    async fn fetch_tasks(&self, token: &AccessToken) -> Result<Vec<TaskRecord>>;

    /// Location keys assigned to an operator, in display order
    async fn fetch_locations_for_user(
        &self,
        token: &AccessToken,
        email: &str,
    ) -> Result<Vec<String>>;

    /// Status rows recorded for one day (`YYYY-MM-DD`)
    async fn fetch_status_rows(&self, token: &AccessToken, date: &str) -> Result<Vec<StatusRow>>;

    /// Opaque mutation marker of a list; cheap
    async fn fetch_list_version(&self, token: &AccessToken, list: &str) -> Result<String>;

    /// Insert or update the row identified by `upsert.idempotency_key`
    async fn upsert_status(&self, token: &AccessToken, upsert: &StatusUpsert) -> Result<()>;

    /// History of one operator, newest first
    async fn fetch_history(&self, token: &AccessToken, email: &str) -> Result<Vec<HistoryRecord>>;

    async fn save_history(&self, token: &AccessToken, record: &HistoryRecord) -> Result<()>;

    /// Display names that may sign a reset for this operator
    async fn fetch_registered_user_names(
        &self,
        token: &AccessToken,
        email: &str,
    ) -> Result<Vec<String>>;
}

/// Produces the bearer credential for an operator
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn login(&self, credential: &Credential) -> Result<User>;

    async fn logout(&self, token: &AccessToken) -> Result<()>;
}
