use crate::store::{lock_db, SharedDatabase};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

pub const SECURITY_ENABLED: &str = "security.enabled";
pub const BIOMETRIC_ENABLED: &str = "security.biometric";
pub const PRIVATE_NOTES_ENABLED: &str = "security.private_notes";
pub const PASSCODE_HASH: &str = "security.passcode.hash";
pub const PASSCODE_SALT: &str = "security.passcode.salt";
pub const VAULT_KEY: &str = "vault.key.b64";
pub const VAULT_KEY_VERSION: &str = "vault.key.version";

#[derive(Debug)]
pub enum SettingsError {
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for SettingsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err)
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Db(err) => write!(f, "settings store error: {err}"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Db(err) => Some(err),
        }
    }
}

/// Secure settings collaborator. Written only by the security enable/disable flows.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
    fn remove(&self, key: &str) -> Result<(), SettingsError>;

    /// Missing or unreadable flags read as `false`.
    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(value)) if value == "true")
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.set(key, if value { "true" } else { "false" })
    }
}

pub struct KvSettings {
    db: SharedDatabase,
}

impl KvSettings {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl SettingsStore for KvSettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(lock_db(&self.db).get_kv(key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        Ok(lock_db(&self.db).set_kv(key, value)?)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        Ok(lock_db(&self.db).delete_kv(key)?)
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let values = self.values.lock().unwrap_or_else(|err| err.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().unwrap_or_else(|err| err.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().unwrap_or_else(|err| err.into_inner());
        values.remove(key);
        Ok(())
    }
}
