//! Error types for cco-sync

use thiserror::Error;

use crate::models::CellKey;

#[derive(Debug, Error)]
pub enum Error {
    #[error("list '{0}' not found")]
    ListNotFound(String),

    #[error("remote store error [{status}]: {message}")]
    Remote { status: u16, message: String },

    #[error("unauthorized: missing, invalid or expired access token")]
    Unauthorized,

    #[error("access denied: check edit permissions on the list")]
    AccessDenied,

    #[error("invalid credentials for {0}")]
    InvalidCredentials(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown location: {0}")]
    UnknownLocation(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("grid not loaded yet")]
    NotLoaded,

    #[error("a reset is already in progress")]
    ResetInProgress,

    #[error("failed to save {cell}: {source}")]
    WriteRejected {
        cell: CellKey,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("reset failed: {0}")]
    Reset(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Failures that the reconciliation loop absorbs and retries on the next tick
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Unauthorized => true,
            Error::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
