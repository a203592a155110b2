use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Serde(serde_json::Error),
    ProjectDir,
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {err}"),
            ConfigError::Serde(err) => write!(f, "config is not valid json: {err}"),
            ConfigError::ProjectDir => write!(f, "no home directory to place config in"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Serde(err) => Some(err),
            ConfigError::ProjectDir => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotesConfig {
    /// Overrides the database location; defaults to the platform data dir.
    pub database_path: Option<String>,
    pub idle_grace_ms: u64,
    pub log_filter: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            idle_grace_ms: 5_000,
            log_filter: "info".to_string(),
        }
    }
}

impl NotesConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }
}

pub struct ConfigStore {
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(config_path: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            config_path,
            data_dir,
        }
    }

    pub fn default_store() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("app", "locknote", "Locknote").ok_or(ConfigError::ProjectDir)?;
        Ok(Self::new(
            project_dirs.config_dir().join("config.json"),
            project_dirs.data_dir().to_path_buf(),
        ))
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn load(&self) -> Result<NotesConfig, ConfigError> {
        if !self.config_path.exists() {
            return Ok(NotesConfig::default());
        }
        let raw = fs::read_to_string(&self.config_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Like `load`, but writes the defaults out when no file exists yet.
    pub fn load_or_init(&self) -> Result<NotesConfig, ConfigError> {
        if self.config_path.exists() {
            return self.load();
        }
        let config = NotesConfig::default();
        self.save(&config)?;
        tracing::info!(path = %self.config_path.display(), "wrote default config");
        Ok(config)
    }

    pub fn save(&self, config: &NotesConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, data)?;
        Ok(())
    }

    pub fn database_path(&self, config: &NotesConfig) -> PathBuf {
        match config.database_path.as_deref() {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => self.data_dir.join("locknote.db"),
        }
    }
}
