use crate::config::{ConfigError, ConfigStore, NotesConfig};
use crate::db::Database;
use crate::lifecycle::SecurityLifecycleManager;
use crate::settings::KvSettings;
use crate::store::{shared, SqliteNoteStore};
use crate::telemetry::Telemetry;
use crate::vault::CryptoVault;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BACKUP_PREFIX: &str = "locknote-";
const BACKUPS_KEPT: usize = 3;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Db(rusqlite::Error),
    Io(std::io::Error),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "{err}"),
            AppError::Db(err) => write!(f, "database error: {err}"),
            AppError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Db(err) => Some(err),
            AppError::Io(err) => Some(err),
        }
    }
}

/// Everything a front end needs, wired over one database file. Note content is
/// only reachable through the manager, which enforces the security gate.
pub struct Session {
    db_path: PathBuf,
    manager: SecurityLifecycleManager,
}

impl Session {
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn manager(&self) -> &SecurityLifecycleManager {
        &self.manager
    }
}

pub fn open_notes_database(db_path: &Path) -> Result<Database, AppError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let existed = db_path.exists();
    let db = Database::open(db_path)?;
    if existed {
        backup_before_migration(db_path, &db)?;
    }
    db.run_migrations()?;
    Ok(db)
}

pub fn backup_before_migration(db_path: &Path, db: &Database) -> Result<Option<PathBuf>, AppError> {
    backup_before_migration_at(db_path, db, Utc::now())
}

pub fn backup_before_migration_at(
    db_path: &Path,
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>, AppError> {
    let current_version = db.current_schema_version()?;
    let latest_version = Database::latest_migration_version();
    if current_version >= latest_version {
        return Ok(None);
    }

    let backup_dir = db_path
        .parent()
        .map(|parent| parent.join("backups"))
        .unwrap_or_else(|| PathBuf::from("backups"));
    std::fs::create_dir_all(&backup_dir)?;
    let stamp = now.format("%Y%m%d%H%M%S").to_string();
    let backup_path = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.db"));
    std::fs::copy(db_path, &backup_path)?;
    tracing::info!(
        from = current_version,
        to = latest_version,
        backup = %backup_path.display(),
        "backed up database before migration"
    );
    rotate_backups(&backup_dir, BACKUPS_KEPT)?;
    Ok(Some(backup_path))
}

pub fn rotate_backups(backup_dir: &Path, keep: usize) -> Result<(), AppError> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(backup_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy())
                .is_some_and(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".db"))
        })
        .collect();

    if backups.len() <= keep {
        return Ok(());
    }
    backups.sort();
    for path in &backups[..backups.len() - keep] {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

pub fn open_session(
    db_path: &Path,
    idle_grace: Duration,
    telemetry: Arc<dyn Telemetry>,
) -> Result<Session, AppError> {
    let db = shared(open_notes_database(db_path)?);
    let settings = Arc::new(KvSettings::new(Arc::clone(&db)));
    let store = Arc::new(SqliteNoteStore::new(db));
    let vault = Arc::new(CryptoVault::new(settings, Arc::clone(&telemetry)));
    let manager = SecurityLifecycleManager::new(store, vault, telemetry, idle_grace);
    Ok(Session {
        db_path: db_path.to_path_buf(),
        manager,
    })
}

/// Opens the session `config` points at. `db_override` wins over the
/// configured database path.
pub fn open_configured_session(
    config_store: &ConfigStore,
    config: &NotesConfig,
    db_override: Option<&Path>,
    telemetry: Arc<dyn Telemetry>,
) -> Result<Session, AppError> {
    let db_path = match db_override {
        Some(path) => path.to_path_buf(),
        None => config_store.database_path(config),
    };
    open_session(&db_path, config.idle_grace(), telemetry)
}
