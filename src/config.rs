//! Configuration for cco-sync

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::pending::SyncStrategy;
use crate::store::STATUS_LIST;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Static API tokens accepted by the list store
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    /// Operators allowed to log in
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
    /// Names that may sign a reset, per operator email
    #[serde(default)]
    pub registered_users: Vec<RegisteredUserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file backing the list store
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the list store
    #[serde(default = "default_remote_url")]
    pub url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub strategy: SyncStrategy,

    /// Reconciliation period
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Sync pause after local writes (cooldown strategy)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Drop unconfirmed ledger entries after this long (ledger strategy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_max_age_secs: Option<u64>,

    /// List whose version marker gates full fetches
    #[serde(default = "default_status_list")]
    pub status_list: String,

    /// First hour (local time) of the automatic partial snapshot window
    #[serde(default = "default_partial_start")]
    pub partial_window_start_hour: u32,

    /// Hour (exclusive) at which the partial snapshot window closes
    #[serde(default = "default_partial_end")]
    pub partial_window_end_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Human-readable name for the token
    pub name: String,
    /// The hashed API token (argon2 hash, or plain text for backwards compat)
    pub token_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub email: String,
    /// Display name
    pub name: String,
    /// argon2 hash of the password
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredUserConfig {
    pub email: String,
    pub names: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cco-sync.sqlite")
}

fn default_remote_url() -> String {
    "http://127.0.0.1:3030".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    6
}

fn default_cooldown_secs() -> u64 {
    8
}

fn default_status_list() -> String {
    STATUS_LIST.to_string()
}

fn default_partial_start() -> u32 {
    10
}

fn default_partial_end() -> u32 {
    22
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::default(),
            poll_interval_secs: default_poll_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            ledger_max_age_secs: None,
            status_list: default_status_list(),
            partial_window_start_hour: default_partial_start(),
            partial_window_end_hour: default_partial_end(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn ledger_max_age(&self) -> Option<Duration> {
        self.ledger_max_age_secs.map(Duration::from_secs)
    }

    /// Whether `hour` (0-23, local) falls in the partial snapshot window
    pub fn in_partial_window(&self, hour: u32) -> bool {
        hour >= self.partial_window_start_hour && hour < self.partial_window_end_hour
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: default_bind(),
                port: default_port(),
            },
            database: DatabaseConfig {
                path: default_db_path(),
            },
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            tokens: Vec::new(),
            operators: Vec::new(),
            registered_users: Vec::new(),
        }
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("CCO_SYNC_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        // Docker default
        let data_config = PathBuf::from("/data/config.toml");
        if data_config.exists() {
            return Ok(data_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("cco-sync");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from default path
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).context("Failed to parse config file")?;
        if cfg.sync.partial_window_start_hour > 23 || cfg.sync.partial_window_end_hour > 24 {
            anyhow::bail!("partial window hours must be within 0..=24");
        }
        Ok(cfg)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let with_comments = format!(
            "# cco-sync configuration\n\n\
             {}\n\n\
             # Add store tokens with: cco-sync token --name <device-name>\n\
             # Add operators with:    cco-sync operator --email <email> --name <name> --password <password>\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }

    /// Check if a static API token is valid (supports both hashed and legacy plain tokens)
    pub fn validate_token(&self, token: &str) -> bool {
        self.tokens
            .iter()
            .any(|t| verify_secret(token, &t.token_hash))
    }

    /// Operator whose email and password match
    pub fn verify_operator(&self, email: &str, password: &str) -> Option<&OperatorConfig> {
        self.operators.iter().find(|op| {
            op.email.trim().eq_ignore_ascii_case(email.trim())
                && verify_hashed(password, &op.password_hash)
        })
    }

    pub fn registered_names(&self, email: &str) -> Vec<String> {
        self.registered_users
            .iter()
            .filter(|u| u.email.trim().eq_ignore_ascii_case(email.trim()))
            .flat_map(|u| u.names.iter().cloned())
            .collect()
    }
}

fn verify_secret(secret: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => verify_parsed(secret, &parsed),
        // Plain text comparison (legacy/backwards compat)
        Err(_) => stored == secret,
    }
}

/// Operator passwords must be stored as argon2 hashes
fn verify_hashed(secret: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => verify_parsed(secret, &parsed),
        Err(_) => {
            tracing::warn!("Operator password is not an argon2 hash, rejecting login");
            false
        }
    }
}

fn verify_parsed(secret: &str, parsed: &PasswordHash<'_>) -> bool {
    Argon2::default()
        .verify_password(secret.as_bytes(), parsed)
        .is_ok()
}

/// Hash a token or password using argon2
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {}", e))?;
    Ok(hash.to_string())
}
