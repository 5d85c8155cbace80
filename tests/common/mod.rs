//! Scripted in-memory list store for driving sessions through exact interleavings

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use cco_sync::config::SyncConfig;
use cco_sync::error::{Error, Result};
use cco_sync::models::{
    AccessToken, HistoryRecord, Status, StatusRow, StatusUpsert, TaskRecord, User,
};
use cco_sync::pending::SyncStrategy;
use cco_sync::session::Session;
use cco_sync::store::ListStore;

pub struct ScriptedStore {
    tasks: Vec<TaskRecord>,
    locations: Vec<String>,
    rows: Mutex<BTreeMap<(String, String), Status>>,
    version: AtomicU64,
    history: Mutex<Vec<HistoryRecord>>,
    registered: Vec<String>,
    upserts: Mutex<Vec<StatusUpsert>>,

    pub version_calls: AtomicUsize,
    row_calls: watch::Sender<usize>,
    upsert_calls: watch::Sender<usize>,

    pub fail_upserts: AtomicBool,
    pub fail_version: AtomicBool,

    upserts_open: watch::Sender<bool>,
    rows_open: watch::Sender<bool>,
}

impl ScriptedStore {
    pub fn new(tasks: &[&str], locations: &[&str]) -> Arc<Self> {
        Self::with_tasks(tasks.iter().map(|id| task(id, "Geral")).collect(), locations)
    }

    pub fn with_tasks(tasks: Vec<TaskRecord>, locations: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tasks,
            locations: locations.iter().map(|l| l.to_string()).collect(),
            rows: Mutex::new(BTreeMap::new()),
            version: AtomicU64::new(1),
            history: Mutex::new(Vec::new()),
            registered: vec!["Maria".to_string()],
            upserts: Mutex::new(Vec::new()),
            version_calls: AtomicUsize::new(0),
            row_calls: watch::Sender::new(0),
            upsert_calls: watch::Sender::new(0),
            fail_upserts: AtomicBool::new(false),
            fail_version: AtomicBool::new(false),
            upserts_open: watch::Sender::new(true),
            rows_open: watch::Sender::new(true),
        })
    }

    pub fn row_calls(&self) -> usize {
        *self.row_calls.borrow()
    }

    pub fn upsert_calls(&self) -> usize {
        *self.upsert_calls.borrow()
    }

    /// Wait until `n` row fetches have started
    pub async fn rows_started(&self, n: usize) {
        let _ = self.row_calls.subscribe().wait_for(|calls| *calls >= n).await;
    }

    /// Wait until `n` upserts have started
    pub async fn upserts_started(&self, n: usize) {
        let _ = self.upsert_calls.subscribe().wait_for(|calls| *calls >= n).await;
    }

    /// Change a cell as another operator would
    pub fn set_remote(&self, task_id: &str, location: &str, status: Status) {
        self.rows
            .lock()
            .unwrap()
            .insert((task_id.to_string(), location.to_string()), status);
        self.bump_version();
    }

    pub fn remote(&self, task_id: &str, location: &str) -> Status {
        self.rows
            .lock()
            .unwrap()
            .get(&(task_id.to_string(), location.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.lock().unwrap().clone()
    }

    pub fn upserts(&self) -> Vec<StatusUpsert> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn hold_upserts(&self) {
        self.upserts_open.send_replace(false);
    }

    pub fn release_upserts(&self) {
        self.upserts_open.send_replace(true);
    }

    /// Row fetches capture the rows on entry and return them only once released
    pub fn hold_rows(&self) {
        self.rows_open.send_replace(false);
    }

    pub fn release_rows(&self) {
        self.rows_open.send_replace(true);
    }

    fn rows_snapshot(&self) -> Vec<StatusRow> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|((task_id, location), status)| StatusRow {
                task_id: task_id.clone(),
                location_key: location.clone(),
                status: *status,
                user: String::new(),
            })
            .collect()
    }
}

async fn wait_open(gate: &watch::Sender<bool>) {
    let mut rx = gate.subscribe();
    let _ = rx.wait_for(|open| *open).await;
}

#[async_trait]
impl ListStore for ScriptedStore {
    async fn fetch_tasks(&self, _token: &AccessToken) -> Result<Vec<TaskRecord>> {
        Ok(self.tasks.clone())
    }

    async fn fetch_locations_for_user(
        &self,
        _token: &AccessToken,
        _email: &str,
    ) -> Result<Vec<String>> {
        Ok(self.locations.clone())
    }

    async fn fetch_status_rows(&self, _token: &AccessToken, _date: &str) -> Result<Vec<StatusRow>> {
        let rows = self.rows_snapshot();
        self.row_calls.send_modify(|calls| *calls += 1);
        wait_open(&self.rows_open).await;
        Ok(rows)
    }

    async fn fetch_list_version(&self, _token: &AccessToken, _list: &str) -> Result<String> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_version.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(format!("v{}", self.version.load(Ordering::SeqCst)))
    }

    async fn upsert_status(&self, _token: &AccessToken, upsert: &StatusUpsert) -> Result<()> {
        self.upsert_calls.send_modify(|calls| *calls += 1);
        wait_open(&self.upserts_open).await;

        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                status: 500,
                message: "write rejected".to_string(),
            });
        }

        self.upserts.lock().unwrap().push(upsert.clone());
        self.set_remote(&upsert.task_id, &upsert.location_key, upsert.status);
        Ok(())
    }

    async fn fetch_history(&self, _token: &AccessToken, email: &str) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.email == email)
            .cloned()
            .collect())
    }

    async fn save_history(&self, _token: &AccessToken, record: &HistoryRecord) -> Result<()> {
        self.history.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn fetch_registered_user_names(
        &self,
        _token: &AccessToken,
        _email: &str,
    ) -> Result<Vec<String>> {
        Ok(self.registered.clone())
    }
}

pub fn task(id: &str, category: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("Task {id}"),
        description: String::new(),
        category: category.to_string(),
        time_range: "08:00-09:00".to_string(),
        active: true,
    }
}

pub fn operator() -> User {
    User {
        email: "cco.logistica@example.com".to_string(),
        name: "Logística 1".to_string(),
        access_token: AccessToken("test-token".to_string()),
    }
}

/// Settings with a loop period long enough that only explicit ticks run
pub fn settings(strategy: SyncStrategy) -> SyncConfig {
    SyncConfig {
        strategy,
        poll_interval_secs: 3600,
        // Keep the partial snapshot out of the way unless a test asks for it
        partial_window_start_hour: 0,
        partial_window_end_hour: 0,
        ..SyncConfig::default()
    }
}

pub async fn start(store: &Arc<ScriptedStore>, strategy: SyncStrategy) -> Arc<Session> {
    let store: Arc<dyn ListStore> = store.clone();
    Arc::new(
        Session::start(store, operator(), settings(strategy))
            .await
            .unwrap(),
    )
}
