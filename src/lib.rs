//! cco-sync - Operations checklist sync engine
//!
//! Keeps a per-operator grid of task x location statuses in step with a
//! shared remote list store: optimistic local writes, a version-gated
//! reconciliation loop, and single-flight resets with history snapshots.

pub mod api;
pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod grid;
pub mod models;
pub mod pending;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
