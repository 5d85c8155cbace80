//! List store server, HTTP client and dashboard API wired together over real sockets

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use cco_sync::api::{dashboard, store};
use cco_sync::auth::LocalAuthenticator;
use cco_sync::config::{Config, OperatorConfig, RegisteredUserConfig, SyncConfig, hash_secret};
use cco_sync::error::Error;
use cco_sync::models::{AccessToken, CellKey, Credential, Status, StatusUpsert, TaskRecord};
use cco_sync::store::{Authenticator, HttpStore, ListStore, STATUS_LIST, SqliteStore};

const EMAIL: &str = "cco.logistica@example.com";

fn task(id: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("Conferir {id}"),
        description: String::new(),
        category: "Abertura".to_string(),
        time_range: "06:00-07:00".to_string(),
        active: true,
    }
}

async fn spawn_store() -> String {
    let db = SqliteStore::in_memory().unwrap();
    db.seed_task(&task("T1"), 0).unwrap();
    db.seed_task(&task("T2"), 1).unwrap();
    db.seed_location("CD01", EMAIL, 0).unwrap();
    db.seed_location("CD02", EMAIL, 1).unwrap();
    db.seed_location("CD99", "other@example.com", 0).unwrap();

    let config = Config {
        operators: vec![OperatorConfig {
            email: EMAIL.to_string(),
            name: "Logística 1".to_string(),
            password_hash: hash_secret("1234").unwrap(),
        }],
        registered_users: vec![RegisteredUserConfig {
            email: EMAIL.to_string(),
            names: vec!["Maria".to_string(), "João".to_string()],
        }],
        ..Config::default()
    };

    let state = store::StoreState::new(db, LocalAuthenticator::new(config)).unwrap();
    serve(store::create_router(state)).await
}

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base: &str) -> HttpStore {
    HttpStore::new(base, Duration::from_secs(5)).unwrap()
}

fn credential(password: &str) -> Credential {
    Credential {
        email: EMAIL.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn health_needs_no_token() {
    let base = spawn_store().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn store_rejects_missing_and_unknown_tokens() {
    let base = spawn_store().await;
    let http = client(&base);

    let resp = reqwest::get(format!("{base}/api/v1/tasks")).await.unwrap();
    assert_eq!(resp.status(), 401);

    let err = http
        .fetch_tasks(&AccessToken("nope".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized));

    let err = http.login(&credential("wrong")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidCredentials(_)));
}

#[tokio::test]
async fn client_reads_and_writes_through_the_store() {
    let base = spawn_store().await;
    let http = client(&base);
    let user = http.login(&credential("1234")).await.unwrap();
    let token = &user.access_token;
    assert_eq!(user.name, "Logística 1");

    let tasks = http.fetch_tasks(token).await.unwrap();
    assert_eq!(tasks.len(), 2);
    let locations = http.fetch_locations_for_user(token, EMAIL).await.unwrap();
    assert_eq!(locations, vec!["CD01", "CD02"]);

    let before = http.fetch_list_version(token, STATUS_LIST).await.unwrap();
    assert_eq!(
        http.fetch_list_version(token, STATUS_LIST).await.unwrap(),
        before
    );

    let cell = CellKey::new("T1", "CD01");
    let upsert = StatusUpsert::new("2026-10-17", &cell, Status::Ok, &user.name);
    http.upsert_status(token, &upsert).await.unwrap();
    let upsert = StatusUpsert::new("2026-10-17", &cell, Status::Ea, &user.name);
    http.upsert_status(token, &upsert).await.unwrap();

    let after = http.fetch_list_version(token, STATUS_LIST).await.unwrap();
    assert_ne!(after, before);

    let rows = http.fetch_status_rows(token, "2026-10-17").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, Status::Ea);
    assert!(http.fetch_status_rows(token, "2026-10-16").await.unwrap().is_empty());

    let names = http.fetch_registered_user_names(token, EMAIL).await.unwrap();
    assert_eq!(names, vec!["João", "Maria"]);

    http.logout(token).await.unwrap();
    let err = http.fetch_tasks(token).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized));
}

#[tokio::test]
async fn missing_list_is_reported() {
    let base = spawn_store().await;
    let http = client(&base);
    let user = http.login(&credential("1234")).await.unwrap();

    let err = http
        .fetch_list_version(&user.access_token, "Lista_Inexistente")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ListNotFound(name) if name == "Lista_Inexistente"));

    let info = http
        .resolve_list(&user.access_token, "status checklist")
        .await
        .unwrap();
    assert_eq!(info.name, STATUS_LIST);
}

#[tokio::test]
async fn dashboard_session_end_to_end() {
    let store_url = spawn_store().await;
    let remote = Arc::new(client(&store_url));
    let settings = SyncConfig {
        poll_interval_secs: 3600,
        partial_window_start_hour: 0,
        partial_window_end_hour: 0,
        ..SyncConfig::default()
    };
    let state = dashboard::DashboardState::new(remote.clone(), remote, settings);
    let base = serve(dashboard::create_router(state.clone())).await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{base}/api/v1/session"))
        .json(&json!({ "email": EMAIL, "password": "1234" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let session: Value = resp.json().await.unwrap();
    let token = session["accessToken"].as_str().unwrap().to_string();
    assert_eq!(session["grid"]["locations"], json!(["CD01", "CD02"]));
    assert_eq!(session["grid"]["tasks"][0]["operations"]["CD01"], "PR");

    let resp = http
        .get(format!("{base}/api/v1/grid"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let cell: Value = http
        .post(format!("{base}/api/v1/cells"))
        .bearer_auth(&token)
        .json(&json!({ "taskId": "T1", "location": "CD01" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cell["outcome"], "written");
    assert_eq!(cell["status"], "OK");

    let cell: Value = http
        .post(format!("{base}/api/v1/cells"))
        .bearer_auth(&token)
        .json(&json!({ "taskId": "T1", "location": "CD02", "key": "3" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cell["status"], "ATT");

    let resp = http
        .post(format!("{base}/api/v1/cells"))
        .bearer_auth(&token)
        .json(&json!({ "taskId": "T1", "location": "CD77" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let paint: Value = http
        .post(format!("{base}/api/v1/rows/T2/paint"))
        .bearer_auth(&token)
        .json(&json!({ "status": "AT" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(paint["written"], 2);

    let stats: Value = http
        .get(format!("{base}/api/v1/stats"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["categories"][0]["okCells"], 1);
    assert_eq!(stats["categories"][0]["percent"], 25);
    assert_eq!(stats["summary"]["totalCells"], 4);
    assert_eq!(stats["summary"]["okCells"], 1);
    assert_eq!(stats["summary"]["issueCells"], 3);
    assert_eq!(stats["summary"]["pendingCells"], 0);
    assert_eq!(stats["summary"]["locations"][0]["location"], "CD02");
    assert_eq!(stats["summary"]["locations"][0]["issues"], 2);

    let users: Value = http
        .get(format!("{base}/api/v1/users"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users["names"], json!(["João", "Maria"]));
    assert!(users["suggested"].is_null());

    let resp = http
        .post(format!("{base}/api/v1/reset"))
        .bearer_auth(&token)
        .json(&json!({ "responsible": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let reset: Value = http
        .post(format!("{base}/api/v1/reset"))
        .bearer_auth(&token)
        .json(&json!({ "responsible": "Maria" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["cells"], 4);

    let grid: Value = http
        .get(format!("{base}/api/v1/grid"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(grid["tasks"][0]["operations"]["CD01"], "PR");
    assert_eq!(grid["tasks"][1]["operations"]["CD02"], "PR");

    let history: Value = http
        .get(format!("{base}/api/v1/history"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["record"]["resetBy"], "Maria");
    assert_eq!(
        history[0]["record"]["tasks"][0]["operations"]["CD01"],
        "OK"
    );

    let sync: Value = http
        .get(format!("{base}/api/v1/sync"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sync["indicator"], "live");

    let resp = http
        .delete(format!("{base}/api/v1/session"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = http
        .get(format!("{base}/api/v1/grid"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    state.close_all().await;
}
