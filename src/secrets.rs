//! Redmine API key storage in the OS keyring.
//!
//! The settings file never carries the key. Files written by older versions
//! may still hold one; it is moved into the keyring the next time settings
//! are opened.

use keyring::{Entry, Error as KeyringError};
use log::{info, warn};
use thiserror::Error;

use crate::config::Config;

pub const KEYRING_SERVICE: &str = "org.redmine-timer";
const KEYRING_ACCOUNT: &str = "api-key";

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("API key must not be empty")]
    EmptyKey,
    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),
}

/// Where the API key lives between runs.
pub trait CredentialStore: Send + Sync {
    fn api_key(&self) -> Result<Option<String>, SecretsError>;
    fn set_api_key(&self, key: &str) -> Result<(), SecretsError>;
    fn clear_api_key(&self) -> Result<(), SecretsError>;
}

/// Platform keyring entry (`service`, `api-key`).
pub struct KeyringCredentials {
    service: String,
}

impl KeyringCredentials {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, SecretsError> {
        Ok(Entry::new(&self.service, KEYRING_ACCOUNT)?)
    }
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentials {
    fn api_key(&self) -> Result<Option<String>, SecretsError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_api_key(&self, key: &str) -> Result<(), SecretsError> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(SecretsError::EmptyKey);
        }
        self.entry()?.set_password(trimmed)?;
        Ok(())
    }

    fn clear_api_key(&self) -> Result<(), SecretsError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Moves a key still present in the settings file into `store`.
/// Returns `true` when the file should be rewritten without it.
pub fn migrate_file_key(config: &Config, store: &dyn CredentialStore) -> Result<bool, SecretsError> {
    if config.api_key.is_empty() {
        return Ok(false);
    }
    store.set_api_key(&config.api_key)?;
    info!("Moved API key from the settings file into the keyring");
    Ok(true)
}

/// Fills `config.api_key` from `store` unless the file still carried one.
/// Keyring failures only warn; remote features then stay unconfigured.
pub fn with_stored_api_key(mut config: Config, store: &dyn CredentialStore) -> Config {
    if !config.api_key.is_empty() {
        return config;
    }
    match store.api_key() {
        Ok(Some(key)) => config.api_key = key.trim().to_string(),
        Ok(None) => {}
        Err(err) => warn!("Could not read API key from keyring: {}", err),
    }
    config
}
