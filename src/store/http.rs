//! HTTP client for a remote list store

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{
    Authenticator, HISTORY_LIST, ListStore, OPERATIONS_LIST, STATUS_LIST, TASKS_LIST, USERS_LIST,
};
use crate::error::{Error, Result};
use crate::models::{
    AccessToken, Credential, HistoryRecord, ListInfo, ListVersion, StatusRow, StatusUpsert,
    TaskRecord, User,
};

/// Gateway to a list store over HTTP.
///
/// Resolved list identifiers are memoized for the lifetime of the client.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    catalog: Mutex<HashMap<String, ListInfo>>,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            catalog: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Catalog entry for a list, fetched once per process.
    ///
    /// A missing list is a configuration problem and is reported right away.
    pub async fn resolve_list(&self, token: &AccessToken, name: &str) -> Result<ListInfo> {
        let key = name.to_lowercase();
        if let Some(info) = self
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(info.clone());
        }

        let request = self
            .client
            .get(self.url(&format!("/lists/{name}")))
            .bearer_auth(token.as_str());

        let info: ListInfo = match send_json(request).await {
            Err(Error::Remote { status: 404, .. }) => {
                return Err(Error::ListNotFound(name.to_string()));
            }
            other => other?,
        };

        tracing::debug!(list = name, id = %info.id, "Resolved list");
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, info.clone());
        Ok(info)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        token: &AccessToken,
        list: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.resolve_list(token, list).await?;
        let request = self
            .client
            .get(self.url(path))
            .bearer_auth(token.as_str())
            .query(query);
        send_json(request).await
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
        StatusCode::FORBIDDEN => Err(Error::AccessDenied),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or(body);
            tracing::warn!(status = status.as_u16(), %message, "List store request failed");
            Err(Error::Remote {
                status: status.as_u16(),
                message,
            })
        }
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    Ok(send(request).await?.json().await?)
}

#[async_trait]
impl ListStore for HttpStore {
    async fn fetch_tasks(&self, token: &AccessToken) -> Result<Vec<TaskRecord>> {
        self.get(token, TASKS_LIST, "/tasks", &[]).await
    }

    async fn fetch_locations_for_user(
        &self,
        token: &AccessToken,
        email: &str,
    ) -> Result<Vec<String>> {
        self.get(token, OPERATIONS_LIST, "/locations", &[("email", email)])
            .await
    }

    async fn fetch_status_rows(&self, token: &AccessToken, date: &str) -> Result<Vec<StatusRow>> {
        self.get(token, STATUS_LIST, "/statuses", &[("date", date)])
            .await
    }

    async fn fetch_list_version(&self, token: &AccessToken, list: &str) -> Result<String> {
        let info = self.resolve_list(token, list).await?;
        let request = self
            .client
            .get(self.url(&format!("/lists/{}/version", info.id)))
            .bearer_auth(token.as_str());
        let version: ListVersion = send_json(request).await?;
        Ok(version.version)
    }

    async fn upsert_status(&self, token: &AccessToken, upsert: &StatusUpsert) -> Result<()> {
        self.resolve_list(token, STATUS_LIST).await?;
        let request = self
            .client
            .put(self.url("/statuses"))
            .bearer_auth(token.as_str())
            .json(upsert);
        send(request).await?;
        Ok(())
    }

    async fn fetch_history(&self, token: &AccessToken, email: &str) -> Result<Vec<HistoryRecord>> {
        self.get(token, HISTORY_LIST, "/history", &[("email", email)])
            .await
    }

    async fn save_history(&self, token: &AccessToken, record: &HistoryRecord) -> Result<()> {
        self.resolve_list(token, HISTORY_LIST).await?;
        let request = self
            .client
            .post(self.url("/history"))
            .bearer_auth(token.as_str())
            .json(record);
        send(request).await?;
        Ok(())
    }

    async fn fetch_registered_user_names(
        &self,
        token: &AccessToken,
        email: &str,
    ) -> Result<Vec<String>> {
        self.get(token, USERS_LIST, "/users", &[("email", email)])
            .await
    }
}

#[async_trait]
impl Authenticator for HttpStore {
    async fn login(&self, credential: &Credential) -> Result<User> {
        let request = self.client.post(self.url("/login")).json(credential);
        match send_json(request).await {
            Err(Error::Unauthorized) => Err(Error::InvalidCredentials(credential.email.clone())),
            other => other,
        }
    }

    async fn logout(&self, token: &AccessToken) -> Result<()> {
        let request = self
            .client
            .post(self.url("/logout"))
            .bearer_auth(token.as_str());
        send(request).await?;
        Ok(())
    }
}
