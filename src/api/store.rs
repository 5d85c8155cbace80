//! List store server
//!
//! Serves the checklist lists out of SQLite to dashboard sessions.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{ApiError, bearer_token, health};
use crate::auth::LocalAuthenticator;
use crate::error::Error;
use crate::models::{
    AccessToken, Credential, HistoryRecord, ListInfo, ListVersion, StatusRow, StatusUpsert,
    TaskRecord, User,
};
use crate::store::{Authenticator, ListStore, SqliteStore};

/// Application state shared across handlers
pub struct StoreState {
    pub store: SqliteStore,
    pub auth: LocalAuthenticator,
}

impl StoreState {
    /// Seed registered names from the config and wrap for sharing
    pub fn new(store: SqliteStore, auth: LocalAuthenticator) -> crate::error::Result<Arc<Self>> {
        for entry in &auth.config().registered_users {
            for name in &entry.names {
                store.seed_registered_user(&entry.email, name)?;
            }
        }
        Ok(Arc::new(Self { store, auth }))
    }
}

/// Create the list store router
pub fn create_router(state: Arc<StoreState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/login", post(login))
        .route("/api/v1/logout", post(logout))
        .route("/api/v1/lists/{name}", get(find_list))
        .route("/api/v1/lists/{id}/version", get(list_version))
        .route("/api/v1/tasks", get(tasks))
        .route("/api/v1/locations", get(locations))
        .route("/api/v1/statuses", get(statuses).put(upsert_status))
        .route("/api/v1/history", get(history).post(save_history))
        .route("/api/v1/users", get(users))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_public(uri: &Uri) -> bool {
    matches!(uri.path(), "/health" | "/api/v1/login")
}

/// Auth middleware - validates Bearer token
async fn auth_middleware(
    State(state): State<Arc<StoreState>>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if is_public(request.uri()) {
        return next.run(request).await;
    }

    match bearer_token(request.headers()) {
        Some(token) if state.auth.accepts(token) => next.run(request).await,
        Some(_) => ApiError(Error::Unauthorized).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Missing or invalid Authorization header" })),
        )
            .into_response(),
    }
}

fn token_of(headers: &axum::http::HeaderMap) -> AccessToken {
    AccessToken(bearer_token(headers).unwrap_or_default().to_string())
}

async fn login(
    State(state): State<Arc<StoreState>>,
    Json(credential): Json<Credential>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.auth.login(&credential).await?))
}

async fn logout(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.auth.logout(&token_of(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn find_list(
    State(state): State<Arc<StoreState>>,
    Path(name): Path<String>,
) -> Result<Json<ListInfo>, ApiError> {
    state
        .store
        .find_list(&name)?
        .map(Json)
        .ok_or_else(|| ApiError(Error::ListNotFound(name)))
}

async fn list_version(
    State(state): State<Arc<StoreState>>,
    Path(id): Path<String>,
) -> Result<Json<ListVersion>, ApiError> {
    state
        .store
        .list_version_by_id(&id)?
        .map(Json)
        .ok_or_else(|| ApiError(Error::ListNotFound(id)))
}

async fn tasks(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    Ok(Json(state.store.fetch_tasks(&token_of(&headers)).await?))
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: String,
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: String,
}

async fn locations(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<EmailQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(
        state
            .store
            .fetch_locations_for_user(&token_of(&headers), &query.email)
            .await?,
    ))
}

async fn statuses(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<StatusRow>>, ApiError> {
    Ok(Json(
        state
            .store
            .fetch_status_rows(&token_of(&headers), &query.date)
            .await?,
    ))
}

async fn upsert_status(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
    Json(upsert): Json<StatusUpsert>,
) -> Result<StatusCode, ApiError> {
    if upsert.idempotency_key.trim().is_empty() {
        return Err(ApiError(Error::InvalidRequest(
            "idempotency key is required".to_string(),
        )));
    }

    tracing::info!(
        key = %upsert.idempotency_key,
        status = %upsert.status,
        user = %upsert.user,
        "Status upsert received"
    );
    state
        .store
        .upsert_status(&token_of(&headers), &upsert)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn history(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<EmailQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    Ok(Json(
        state
            .store
            .fetch_history(&token_of(&headers), &query.email)
            .await?,
    ))
}

async fn save_history(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
    Json(record): Json<HistoryRecord>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        id = %record.id,
        reset_by = %record.reset_by,
        partial = record.is_partial,
        "History record received"
    );
    state
        .store
        .save_history(&token_of(&headers), &record)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn users(
    State(state): State<Arc<StoreState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<EmailQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(
        state
            .store
            .fetch_registered_user_names(&token_of(&headers), &query.email)
            .await?,
    ))
}
