//! Operator dashboard API
//!
//! Each login starts a [`Session`] against the list store; the access token
//! returned by the store identifies the session on later requests.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{ApiError, bearer_token, health};
use crate::command::{PaintReport, ResetReport, WriteOutcome};
use crate::config::SyncConfig;
use crate::error::Error;
use crate::models::{AccessToken, CategoryStats, Credential, GridSummary, Status};
use crate::session::{GridController, GridView, RegisteredUsers, Session, SyncIndicator};
use crate::snapshot::{self, TimelineEntry};
use crate::store::{Authenticator, ListStore};
use crate::sync::LoopState;

pub struct DashboardState {
    store: Arc<dyn ListStore>,
    auth: Arc<dyn Authenticator>,
    settings: SyncConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl DashboardState {
    pub fn new(
        store: Arc<dyn ListStore>,
        auth: Arc<dyn Authenticator>,
        settings: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            auth,
            settings,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    async fn session(&self, headers: &HeaderMap) -> Result<Arc<Session>, ApiError> {
        let token = bearer_token(headers).ok_or(ApiError(Error::Unauthorized))?;
        self.sessions
            .lock()
            .await
            .get(token)
            .cloned()
            .ok_or(ApiError(Error::Unauthorized))
    }

    /// Stop every session's loop
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.teardown().await;
        }
    }
}

/// Create the dashboard router
pub fn create_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/session", post(login).delete(logout))
        .route("/api/v1/grid", get(grid))
        .route("/api/v1/cells", post(cell))
        .route("/api/v1/rows/{task_id}/paint", post(paint_row))
        .route("/api/v1/reset", post(reset))
        .route("/api/v1/history", get(history))
        .route("/api/v1/users", get(users))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/sync", get(sync_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    email: String,
    name: String,
    access_token: AccessToken,
    grid: GridView,
}

async fn login(
    State(state): State<Arc<DashboardState>>,
    Json(credential): Json<Credential>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let user = state.auth.login(&credential).await?;
    let token = user.access_token.as_str().to_string();

    let session = match Session::start(
        Arc::clone(&state.store),
        user.clone(),
        state.settings.clone(),
    )
    .await
    {
        Ok(session) => Arc::new(session),
        Err(e) => {
            // Nothing to sync with; hand the token back
            if let Err(logout_err) = state.auth.logout(&user.access_token).await {
                tracing::debug!(error = %logout_err, "Logout after failed load");
            }
            return Err(e.into());
        }
    };

    let grid = session.grid().await?;
    let previous = state.sessions.lock().await.insert(token, session);
    if let Some(previous) = previous {
        previous.teardown().await;
    }

    Ok((
        StatusCode::CREATED,
        Json(SessionInfo {
            email: user.email,
            name: user.name,
            access_token: user.access_token,
            grid,
        }),
    ))
}

async fn logout(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError(Error::Unauthorized))?;
    let session = state
        .sessions
        .lock()
        .await
        .remove(token)
        .ok_or(ApiError(Error::Unauthorized))?;

    session.teardown().await;
    state.auth.logout(&session.user().access_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn grid(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
) -> Result<Json<GridView>, ApiError> {
    let session = state.session(&headers).await?;
    Ok(Json(session.grid().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellRequest {
    task_id: String,
    location: String,
    /// Explicit target value
    status: Option<Status>,
    /// Active paint tool
    tool: Option<Status>,
    /// Keyboard shortcut of the active tool, when no tool is given
    key: Option<char>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CellResponse {
    outcome: WriteOutcome,
    status: Status,
    revision: u64,
}

async fn cell(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
    Json(req): Json<CellRequest>,
) -> Result<Json<CellResponse>, ApiError> {
    let session = state.session(&headers).await?;
    let tool = req.tool.or_else(|| req.key.and_then(Status::from_shortcut));
    let outcome = session
        .on_cell_interaction(&req.task_id, &req.location, req.status, tool)
        .await?;

    let status = session.get(&req.task_id, &req.location).await;
    let revision = session.grid().await?.revision;
    Ok(Json(CellResponse {
        outcome,
        status,
        revision,
    }))
}

#[derive(Debug, Deserialize)]
struct PaintRequest {
    status: Status,
}

async fn paint_row(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(req): Json<PaintRequest>,
) -> Result<Json<PaintReport>, ApiError> {
    let session = state.session(&headers).await?;
    Ok(Json(session.on_row_paint(&task_id, req.status).await?))
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    responsible: String,
}

async fn reset(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
    Json(req): Json<ResetRequest>,
) -> Result<Json<ResetReport>, ApiError> {
    let session = state.session(&headers).await?;
    Ok(Json(session.on_reset(&req.responsible).await?))
}

async fn history(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<TimelineEntry>>, ApiError> {
    let session = state.session(&headers).await?;
    let records = session.history().await?;
    Ok(Json(snapshot::timeline(&records)))
}

async fn users(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
) -> Result<Json<RegisteredUsers>, ApiError> {
    let session = state.session(&headers).await?;
    Ok(Json(session.registered_users().await?))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    summary: GridSummary,
    categories: Vec<CategoryStats>,
}

async fn stats(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    let session = state.session(&headers).await?;
    Ok(Json(StatsResponse {
        summary: session.summary().await?,
        categories: session.category_stats().await?,
    }))
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    indicator: SyncIndicator,
    state: LoopState,
}

async fn sync_status(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, ApiError> {
    let session = state.session(&headers).await?;
    Ok(Json(SyncResponse {
        indicator: session.sync_status().await,
        state: session.loop_state(),
    }))
}
