//! Operator login and bearer token issuance for the list store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{AccessToken, Credential, User};
use crate::store::Authenticator;

/// Verifies operators against the config and keeps issued tokens in memory
pub struct LocalAuthenticator {
    config: Config,
    issued: Mutex<HashMap<AccessToken, User>>,
}

impl LocalAuthenticator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            issued: Mutex::new(HashMap::new()),
        }
    }

    fn issued(&self) -> MutexGuard<'_, HashMap<AccessToken, User>> {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Operator behind an issued token
    pub fn user_for(&self, token: &str) -> Option<User> {
        self.issued()
            .get(&AccessToken(token.to_string()))
            .cloned()
    }

    /// Whether a bearer token is an issued session token or a configured static token
    pub fn accepts(&self, token: &str) -> bool {
        self.user_for(token).is_some() || self.config.validate_token(token)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    async fn login(&self, credential: &Credential) -> Result<User> {
        let operator = self
            .config
            .verify_operator(&credential.email, &credential.password)
            .ok_or_else(|| Error::InvalidCredentials(credential.email.clone()))?;

        let user = User {
            email: operator.email.clone(),
            name: operator.name.clone(),
            access_token: AccessToken(generate_token("cco")),
        };
        self.issued().insert(user.access_token.clone(), user.clone());

        tracing::info!(email = %user.email, "Operator logged in");
        Ok(user)
    }

    async fn logout(&self, token: &AccessToken) -> Result<()> {
        if let Some(user) = self.issued().remove(token) {
            tracing::info!(email = %user.email, "Operator logged out");
        }
        Ok(())
    }
}

/// Random URL-safe token with a recognizable prefix
pub fn generate_token(prefix: &str) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let token_body: String = bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect();

    format!("{}_{}", prefix, token_body)
}
