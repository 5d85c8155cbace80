//! SQLite-backed list store

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ALL_LISTS, HISTORY_LIST, ListStore, OPERATIONS_LIST, STATUS_LIST, TASKS_LIST};
use crate::error::{Error, Result};
use crate::models::{
    AccessToken, HistoryRecord, ListInfo, ListVersion, Status, StatusRow, StatusUpsert, Task,
    TaskRecord,
};

/// Thread-safe list store over one SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("failed to create database directory: {e}")))?;
        }

        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            -- List catalog and mutation markers
            CREATE TABLE IF NOT EXISTS lists (
                name TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                id TEXT NOT NULL UNIQUE,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT 'Geral',
                time_range TEXT NOT NULL DEFAULT '--:--',
                active INTEGER NOT NULL DEFAULT 1,
                sort_order INTEGER NOT NULL DEFAULT 999,
                created_at TEXT NOT NULL
            );

            -- Locations (operation codes) per operator email
            CREATE TABLE IF NOT EXISTS operations (
                title TEXT NOT NULL,
                email TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (title, email)
            );

            -- One row per cell per day, keyed by the idempotency key
            CREATE TABLE IF NOT EXISTS statuses (
                title TEXT PRIMARY KEY,
                reference_date TEXT NOT NULL,
                task_id TEXT NOT NULL,
                location TEXT NOT NULL,
                status TEXT NOT NULL,
                user TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                reset_by TEXT NOT NULL,
                email TEXT NOT NULL,
                is_partial INTEGER NOT NULL DEFAULT 0,
                tasks_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS registered_users (
                email TEXT NOT NULL,
                display_name TEXT NOT NULL,
                PRIMARY KEY (email, display_name)
            );

            CREATE INDEX IF NOT EXISTS idx_statuses_date ON statuses(reference_date);
            CREATE INDEX IF NOT EXISTS idx_history_email ON history(email);
            "#,
        )?;

        let now = Utc::now().to_rfc3339();
        for name in ALL_LISTS {
            conn.execute(
                "INSERT OR IGNORE INTO lists (name, display_name, id, version, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![name, name.replace('_', " "), uuid::Uuid::new_v4().to_string(), &now],
            )?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look a list up by name or display name, case-insensitively
    pub fn find_list(&self, name: &str) -> Result<Option<ListInfo>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, display_name FROM lists
             WHERE lower(name) = lower(?1) OR lower(display_name) = lower(?1) OR id = ?1",
            params![name],
            |row| {
                Ok(ListInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Version marker of a list by catalog id
    pub fn list_version_by_id(&self, list_id: &str) -> Result<Option<ListVersion>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, version, updated_at FROM lists WHERE id = ?1",
            params![list_id],
            |row| {
                let version: i64 = row.get(1)?;
                let updated_at: String = row.get(2)?;
                Ok(ListVersion {
                    list_id: row.get(0)?,
                    version: format!("{version}@{updated_at}"),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    fn bump_version(conn: &Connection, list: &str) -> Result<()> {
        conn.execute(
            "UPDATE lists SET version = version + 1, updated_at = ?2 WHERE name = ?1",
            params![list, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Add or replace a task definition
    pub fn seed_task(&self, task: &TaskRecord, sort_order: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"INSERT OR REPLACE INTO tasks
               (id, title, description, category, time_range, active, sort_order, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                &task.id,
                &task.title,
                &task.description,
                &task.category,
                &task.time_range,
                task.active as i32,
                sort_order,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Self::bump_version(&conn, TASKS_LIST)
    }

    /// Assign a location to an operator
    pub fn seed_location(&self, location: &str, email: &str, sort_order: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO operations (title, email, sort_order) VALUES (?1, ?2, ?3)",
            params![location, email, sort_order],
        )?;
        Self::bump_version(&conn, OPERATIONS_LIST)
    }

    pub fn seed_registered_user(&self, email: &str, display_name: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO registered_users (email, display_name) VALUES (?1, ?2)",
            params![email, display_name],
        )?;
        Ok(())
    }

    fn tasks(&self) -> Result<Vec<TaskRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, description, category, time_range, active
             FROM tasks ORDER BY sort_order, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TaskRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                category: row.get(3)?,
                time_range: row.get(4)?,
                active: row.get::<_, i32>(5)? != 0,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn locations_for(&self, email: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT title FROM operations
             WHERE lower(trim(email)) = lower(trim(?1))
             ORDER BY sort_order, title",
        )?;
        let rows = stmt.query_map(params![email], |row| row.get(0))?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn status_rows(&self, date: &str) -> Result<Vec<StatusRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT task_id, location, status, user FROM statuses WHERE reference_date = ?1",
        )?;
        let rows = stmt.query_map(params![date], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (task_id, location_key, status, user) = row?;
            match status.parse::<Status>() {
                Ok(status) => out.push(StatusRow {
                    task_id,
                    location_key,
                    status,
                    user,
                }),
                Err(_) => {
                    tracing::warn!(%task_id, %location_key, %status, "Skipping row with unknown status");
                }
            }
        }
        Ok(out)
    }

    fn upsert(&self, upsert: &StatusUpsert) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"INSERT INTO statuses (title, reference_date, task_id, location, status, user, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(title) DO UPDATE SET
                   reference_date = excluded.reference_date,
                   task_id = excluded.task_id,
                   location = excluded.location,
                   status = excluded.status,
                   user = excluded.user,
                   updated_at = excluded.updated_at"#,
            params![
                &upsert.idempotency_key,
                &upsert.date,
                &upsert.task_id,
                &upsert.location_key,
                upsert.status.as_str(),
                &upsert.user,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Self::bump_version(&conn, STATUS_LIST)
    }

    fn history_for(&self, email: &str) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, reset_by, email, is_partial, tasks_json
             FROM history WHERE email = ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![email], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i32>(4)? != 0,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, timestamp, reset_by, email, is_partial, tasks_json) = row?;
            let tasks: Vec<Task> = serde_json::from_str(&tasks_json)?;
            out.push(HistoryRecord {
                id,
                timestamp,
                tasks,
                reset_by,
                email,
                is_partial,
            });
        }
        Ok(out)
    }

    fn insert_history(&self, record: &HistoryRecord) -> Result<()> {
        let tasks_json = serde_json::to_string(&record.tasks)?;
        let conn = self.conn();
        conn.execute(
            r#"INSERT INTO history (id, timestamp, reset_by, email, is_partial, tasks_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &record.id,
                &record.timestamp,
                &record.reset_by,
                &record.email,
                record.is_partial as i32,
                tasks_json,
            ],
        )?;
        Self::bump_version(&conn, HISTORY_LIST)
    }

    fn registered_names(&self, email: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT display_name FROM registered_users
             WHERE lower(trim(email)) = lower(trim(?1)) ORDER BY display_name",
        )?;
        let rows = stmt.query_map(params![email], |row| row.get(0))?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[async_trait]
impl ListStore for SqliteStore {
    async fn fetch_tasks(&self, _token: &AccessToken) -> Result<Vec<TaskRecord>> {
        self.tasks()
    }

    async fn fetch_locations_for_user(
        &self,
        _token: &AccessToken,
        email: &str,
    ) -> Result<Vec<String>> {
        self.locations_for(email)
    }

    async fn fetch_status_rows(&self, _token: &AccessToken, date: &str) -> Result<Vec<StatusRow>> {
        self.status_rows(date)
    }

    async fn fetch_list_version(&self, _token: &AccessToken, list: &str) -> Result<String> {
        let info = self
            .find_list(list)?
            .ok_or_else(|| Error::ListNotFound(list.to_string()))?;
        let version = self
            .list_version_by_id(&info.id)?
            .ok_or_else(|| Error::ListNotFound(list.to_string()))?;
        Ok(version.version)
    }

    async fn upsert_status(&self, _token: &AccessToken, upsert: &StatusUpsert) -> Result<()> {
        self.upsert(upsert)
    }

    async fn fetch_history(&self, _token: &AccessToken, email: &str) -> Result<Vec<HistoryRecord>> {
        self.history_for(email)
    }

    async fn save_history(&self, _token: &AccessToken, record: &HistoryRecord) -> Result<()> {
        self.insert_history(record)
    }

    async fn fetch_registered_user_names(
        &self,
        _token: &AccessToken,
        email: &str,
    ) -> Result<Vec<String>> {
        self.registered_names(email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellKey;

    fn token() -> AccessToken {
        AccessToken("test".to_string())
    }

    fn task(id: &str, active: bool) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            title: format!("Conferir {id}"),
            description: String::new(),
            category: "Abertura".to_string(),
            time_range: "06:00".to_string(),
            active,
        }
    }

    #[tokio::test]
    async fn upsert_updates_one_row_per_cell_and_day() {
        let store = SqliteStore::in_memory().unwrap();
        let cell = CellKey::new("T1", "LAT-CWB");

        for status in [Status::Ok, Status::Ea] {
            let upsert = StatusUpsert::new("2026-10-17", &cell, status, "Maria");
            store.upsert_status(&token(), &upsert).await.unwrap();
        }

        let rows = store.fetch_status_rows(&token(), "2026-10-17").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Status::Ea);
        assert!(store.fetch_status_rows(&token(), "2026-10-16").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_writes_bump_the_version() {
        let store = SqliteStore::in_memory().unwrap();
        let before = store.fetch_list_version(&token(), STATUS_LIST).await.unwrap();

        let upsert = StatusUpsert::new("2026-10-17", &CellKey::new("T1", "L1"), Status::Ok, "Ana");
        store.upsert_status(&token(), &upsert).await.unwrap();

        let after = store.fetch_list_version(&token(), STATUS_LIST).await.unwrap();
        assert_ne!(before, after);
        assert_eq!(
            after,
            store.fetch_list_version(&token(), STATUS_LIST).await.unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_list_is_reported() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.fetch_list_version(&token(), "Nope").await.unwrap_err();
        assert!(matches!(err, Error::ListNotFound(_)));
    }

    #[test]
    fn catalog_lookup_is_case_insensitive_and_accepts_display_names() {
        let store = SqliteStore::in_memory().unwrap();
        let by_name = store.find_list("status_checklist").unwrap().unwrap();
        let by_display = store.find_list("Status Checklist").unwrap().unwrap();
        assert_eq!(by_name, by_display);
        assert_eq!(by_name.name, STATUS_LIST);
    }

    #[tokio::test]
    async fn tasks_keep_order_and_locations_match_email_loosely() {
        let store = SqliteStore::in_memory().unwrap();
        store.seed_task(&task("B", true), 2).unwrap();
        store.seed_task(&task("A", false), 1).unwrap();
        store.seed_location("LAT-SJP", "cco.logistica2@example.com", 2).unwrap();
        store.seed_location("LAT-CWB", "CCO.Logistica2@example.com ", 1).unwrap();
        store.seed_location("LAT-POA", "other@example.com", 1).unwrap();

        let tasks = store.fetch_tasks(&token()).await.unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert!(!tasks[0].active);

        let locations = store
            .fetch_locations_for_user(&token(), "cco.logistica2@example.com")
            .await
            .unwrap();
        assert_eq!(locations, vec!["LAT-CWB", "LAT-SJP"]);
    }

    #[tokio::test]
    async fn history_round_trips_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        for (id, ts, partial) in [
            ("1", "2026-10-16T23:00:00Z", false),
            ("2", "2026-10-17T10:05:00Z", true),
        ] {
            let record = HistoryRecord {
                id: id.to_string(),
                timestamp: ts.to_string(),
                tasks: Vec::new(),
                reset_by: "Maria".to_string(),
                email: "ops@example.com".to_string(),
                is_partial: partial,
            };
            store.save_history(&token(), &record).await.unwrap();
        }

        let history = store.fetch_history(&token(), "ops@example.com").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "2");
        assert!(history[0].is_partial);
    }

    #[tokio::test]
    async fn registered_names_are_scoped_by_email() {
        let store = SqliteStore::in_memory().unwrap();
        store.seed_registered_user("ops@example.com", "Maria").unwrap();
        store.seed_registered_user("ops@example.com", "João").unwrap();
        store.seed_registered_user("other@example.com", "Pedro").unwrap();

        let names = store
            .fetch_registered_user_names(&token(), "OPS@example.com")
            .await
            .unwrap();
        assert_eq!(names, vec!["João", "Maria"]);
    }

    #[test]
    fn opens_database_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lists.sqlite");
        let store = SqliteStore::open(&path).unwrap();
        store.seed_task(&task("T1", true), 1).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.tasks().unwrap().len(), 1);
    }
}
